//! In-memory stand-ins for channels, outbound clients, dialers and resolvers.

use std::{
    sync::{
        Arc, Mutex, atomic::{AtomicBool, AtomicUsize, Ordering}
    }, time::Duration
};

use async_trait::async_trait;
use tokio::sync::{
    Notify, mpsc::{self, UnboundedReceiver, UnboundedSender}
};

use crate::{
    channel::{ByteStream, ChannelControl, ChannelEnd, ChannelKind, ChannelRequest, IncomingRequest}, context::ConnectionContext, error::{ProxyError, ProxyResult}, outbound::{DialTarget, Dialer, OutboundSession}, resolve::{Destination, DestinationResolver, ResolveError}
};

pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// Records everything done through a [`ChannelControl`].
pub(crate) struct MockControl {
    verdict: bool,
    refused: Mutex<Vec<&'static str>>,
    sent: Mutex<Vec<(&'static str, bool)>>,
    requests: Mutex<Vec<ChannelRequest>>,
    replies: Mutex<Vec<bool>>,
    closes: AtomicUsize,
    fail_requests: AtomicBool,
    fail_replies: AtomicBool,
    closed: Notify,
}

impl MockControl {
    pub(crate) fn new() -> Self {
        Self::with_verdict(true)
    }

    /// Answer every request that wants a reply with `verdict`.
    pub(crate) fn with_verdict(verdict: bool) -> Self {
        Self {
            verdict,
            refused: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            fail_requests: AtomicBool::new(false),
            fail_replies: AtomicBool::new(false),
            closed: Notify::new(),
        }
    }

    /// Answer requests of these types with failure.
    pub(crate) fn refuse(&self, kinds: &[&'static str]) {
        self.refused.lock().unwrap().extend_from_slice(kinds);
    }

    pub(crate) fn fail_requests(&self) {
        self.fail_requests.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_replies(&self) {
        self.fail_replies.store(true, Ordering::SeqCst);
    }

    /// `(request type, want_reply)` for every request sent.
    pub(crate) fn sent(&self) -> Vec<(&'static str, bool)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn requests(&self) -> Vec<ChannelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn replies(&self) -> Vec<bool> {
        self.replies.lock().unwrap().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_closed(&self) {
        if self.close_count() > 0 {
            return;
        }
        tokio::time::timeout(WAIT, self.closed.notified())
            .await
            .expect("channel was never closed");
    }
}

#[async_trait]
impl ChannelControl for MockControl {
    async fn send_request(&self, request: ChannelRequest, want_reply: bool) -> ProxyResult<bool> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(ProxyError::ChannelClosed("mock"));
        }
        self.sent.lock().unwrap().push((request.kind(), want_reply));
        let refused = self.refused.lock().unwrap().contains(&request.kind());
        self.requests.lock().unwrap().push(request);
        Ok(if want_reply { self.verdict && !refused } else { true })
    }

    async fn reply(&self, success: bool) -> ProxyResult<()> {
        if self.fail_replies.load(Ordering::SeqCst) {
            return Err(ProxyError::ChannelClosed("mock"));
        }
        self.replies.lock().unwrap().push(success);
        Ok(())
    }

    async fn close(&self) -> ProxyResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.notify_one();
        Ok(())
    }
}

/// The peer of a [`ChannelEnd`] built by [`mock_end`].
pub(crate) struct MockPeer {
    stdout_tx: Option<UnboundedSender<Vec<u8>>>,
    stderr_tx: Option<UnboundedSender<Vec<u8>>>,
    requests_tx: Option<UnboundedSender<IncomingRequest>>,
    pub(crate) stdout_rx: UnboundedReceiver<Vec<u8>>,
    pub(crate) stderr_rx: UnboundedReceiver<Vec<u8>>,
    pub(crate) control: Arc<MockControl>,
}

impl MockPeer {
    pub(crate) fn send(&self, bytes: &[u8]) {
        self.stdout_tx.as_ref().expect("stdout closed").send(bytes.to_vec()).unwrap();
    }

    pub(crate) fn send_stderr(&self, bytes: &[u8]) {
        self.stderr_tx.as_ref().expect("stderr closed").send(bytes.to_vec()).unwrap();
    }

    pub(crate) fn request(&self, request: ChannelRequest, want_reply: bool) {
        self.requests_tx
            .as_ref()
            .expect("requests closed")
            .send(IncomingRequest { request, want_reply })
            .unwrap();
    }

    /// End-of-stream on both byte streams; requests stay open.
    pub(crate) fn eof(&mut self) {
        self.stdout_tx = None;
        self.stderr_tx = None;
    }

    /// The channel is gone: every stream on this side ends. Returns the control for inspection.
    pub(crate) fn disconnect(self) -> Arc<MockControl> {
        self.control
    }

    /// Collect everything written to the primary stream until end-of-stream.
    pub(crate) async fn read_to_end(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let collect = async {
            while let Some(chunk) = self.stdout_rx.recv().await {
                out.extend_from_slice(&chunk);
            }
        };
        tokio::time::timeout(WAIT, collect).await.expect("stream never ended");
        out
    }
}

pub(crate) fn mock_end(control: Arc<MockControl>) -> (ChannelEnd, MockPeer) {
    let (stdout_tx, stdout_in) = mpsc::unbounded_channel();
    let (stdout_out, stdout_rx) = mpsc::unbounded_channel();
    let (stderr_tx, stderr_in) = mpsc::unbounded_channel();
    let (stderr_out, stderr_rx) = mpsc::unbounded_channel();
    let (requests_tx, requests) = mpsc::unbounded_channel();

    let end = ChannelEnd {
        stdout: ByteStream {
            incoming: stdout_in,
            outgoing: stdout_out,
        },
        stderr: ByteStream {
            incoming: stderr_in,
            outgoing: stderr_out,
        },
        requests,
        control: control.clone(),
    };
    let peer = MockPeer {
        stdout_tx: Some(stdout_tx),
        stderr_tx: Some(stderr_tx),
        requests_tx: Some(requests_tx),
        stdout_rx,
        stderr_rx,
        control,
    };
    (end, peer)
}

/// Outbound client that hands out mock channels.
pub(crate) struct MockOutbound {
    address: String,
    opened: Mutex<Vec<ChannelKind>>,
    peers: Mutex<Vec<MockPeer>>,
    refused: Mutex<Vec<&'static str>>,
    fail_open: AtomicBool,
    fail_close: AtomicBool,
    closes: AtomicUsize,
    closed: Notify,
}

impl MockOutbound {
    pub(crate) fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            opened: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
            refused: Mutex::new(Vec::new()),
            fail_open: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            closed: Notify::new(),
        })
    }

    /// Channels opened from now on refuse requests of these types.
    pub(crate) fn refuse_requests(&self, kinds: &[&'static str]) {
        self.refused.lock().unwrap().extend_from_slice(kinds);
    }

    pub(crate) fn fail_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub(crate) fn opened(&self) -> Vec<ChannelKind> {
        self.opened.lock().unwrap().clone()
    }

    /// Take the peer of the most recently opened channel.
    pub(crate) fn take_peer(&self) -> Option<MockPeer> {
        self.peers.lock().unwrap().pop()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_closed(&self) {
        tokio::time::timeout(WAIT, self.closed.notified())
            .await
            .expect("outbound client was never closed");
    }
}

#[async_trait]
impl OutboundSession for MockOutbound {
    fn destination(&self) -> &str {
        &self.address
    }

    async fn open_channel(&self, kind: &ChannelKind) -> ProxyResult<ChannelEnd> {
        self.opened.lock().unwrap().push(kind.clone());
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ProxyError::open_channel(kind.name(), "administratively prohibited"));
        }
        let control = MockControl::new();
        control.refuse(&self.refused.lock().unwrap());
        let (end, peer) = mock_end(Arc::new(control));
        self.peers.lock().unwrap().push(peer);
        Ok(end)
    }

    async fn close(&self) -> ProxyResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.notify_one();
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ProxyError::close(format!("outbound client to {}", self.address), "broken pipe"));
        }
        Ok(())
    }
}

/// Dialer that records targets and returns a preset outcome.
pub(crate) struct MockDialer {
    outbound: Option<Arc<MockOutbound>>,
    targets: Mutex<Vec<DialTarget>>,
}

impl MockDialer {
    pub(crate) fn succeeding(outbound: Arc<MockOutbound>) -> Arc<Self> {
        Arc::new(Self {
            outbound: Some(outbound),
            targets: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn refusing() -> Arc<Self> {
        Arc::new(Self {
            outbound: None,
            targets: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn targets(&self) -> Vec<DialTarget> {
        self.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, target: &DialTarget) -> ProxyResult<Arc<dyn OutboundSession>> {
        self.targets.lock().unwrap().push(target.clone());
        match &self.outbound {
            Some(outbound) => Ok(outbound.clone()),
            None => Err(ProxyError::OutboundAuthRejected {
                destination: target.destination.address(),
                user: target.user.clone(),
            }),
        }
    }
}

/// Resolver with a fixed answer.
pub(crate) struct MockResolver(pub(crate) Result<Destination, ResolveError>);

impl DestinationResolver for MockResolver {
    fn resolve(&self, _ctx: &ConnectionContext) -> Result<Destination, ResolveError> {
        self.0.clone()
    }
}
