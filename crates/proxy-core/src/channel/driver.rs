//! Tasks that own a russh channel and expose it as a [`ChannelEnd`].
//!
//! Every channel is split in two. The reader task is the only caller of `wait` and never blocks, so
//! window adjusts keep flowing while the writer task is stalled on the peer's window.
//!
//! Inbound channels do not send replies from here: russh only accepts a reply while its request is
//! the session's current one, so verdicts go to the server handler through [`Verdicts`] and are
//! applied inside the request callback.

use std::{
    collections::VecDeque, future::Future, sync::{Arc, Mutex, PoisonError}
};

use async_trait::async_trait;
use russh::{Channel, ChannelId, ChannelMsg, ChannelReadHalf, ChannelWriteHalf, client, server};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender}, oneshot
};
use tracing::{debug, trace};

use super::{ByteStream, ChannelControl, ChannelEnd, ChannelRequest, IncomingRequest};
use crate::error::{ProxyError, ProxyResult};

/// Verdicts for an inbound channel's requests, oldest first.
pub(crate) type Verdicts = UnboundedReceiver<bool>;

type Pending = Arc<Mutex<VecDeque<oneshot::Sender<ProxyResult<bool>>>>>;

/// Which side of the proxy a driven channel lives on.
enum Leg {
    /// Channel accepted from a client; exit reports go through the server handle.
    Inbound(server::Handle),
    /// Channel opened on the outbound client toward a destination.
    Outbound,
}

impl Leg {
    fn label(&self) -> &'static str {
        match self {
            Leg::Inbound(_) => "local",
            Leg::Outbound => "remote",
        }
    }
}

enum Command {
    Request {
        request: ChannelRequest,
        want_reply: bool,
        reply: oneshot::Sender<ProxyResult<bool>>,
    },
    Close,
}

/// How a request is carried toward this channel's peer.
enum Dispatch {
    /// Sent; the verdict arrives later as `Success` / `Failure`.
    AwaitReply,
    /// Sent and nothing comes back.
    Sent,
    /// Cannot be carried in this direction.
    Refused,
}

struct DriverControl {
    label: &'static str,
    commands: UnboundedSender<Command>,
    verdicts: Option<UnboundedSender<bool>>,
}

#[async_trait]
impl ChannelControl for DriverControl {
    async fn send_request(&self, request: ChannelRequest, want_reply: bool) -> ProxyResult<bool> {
        let (reply, verdict) = oneshot::channel();
        self.commands
            .send(Command::Request {
                request,
                want_reply,
                reply,
            })
            .map_err(|_| ProxyError::ChannelClosed(self.label))?;
        verdict.await.map_err(|_| ProxyError::ChannelClosed(self.label))?
    }

    async fn reply(&self, success: bool) -> ProxyResult<()> {
        match &self.verdicts {
            Some(verdicts) => verdicts.send(success).map_err(|_| ProxyError::ChannelClosed(self.label)),
            // Destinations never ask the proxy for a verdict.
            None => Ok(()),
        }
    }

    async fn close(&self) -> ProxyResult<()> {
        self.commands.send(Command::Close).map_err(|_| ProxyError::ChannelClosed(self.label))
    }
}

/// Drive a channel accepted from a client. The receiver yields the verdict for each request the
/// handler has to answer.
pub(crate) fn spawn_inbound(channel: Channel<server::Msg>, handle: server::Handle) -> (ChannelEnd, Verdicts) {
    let (verdicts_tx, verdicts) = mpsc::unbounded_channel();
    (spawn(channel, Leg::Inbound(handle), Some(verdicts_tx)), verdicts)
}

/// Drive a channel opened toward a destination.
pub(crate) fn spawn_outbound(channel: Channel<client::Msg>) -> ChannelEnd {
    spawn(channel, Leg::Outbound, None)
}

/// Requests an inbound channel's client always gets an answer for through the handler callback.
///
/// russh reports these with `want_reply` set regardless of what the client sent.
pub(crate) fn answered_in_callback(request: &ChannelRequest) -> bool {
    matches!(
        request,
        ChannelRequest::Pty { .. }
            | ChannelRequest::Shell
            | ChannelRequest::Exec { .. }
            | ChannelRequest::Env { .. }
            | ChannelRequest::Subsystem { .. }
            | ChannelRequest::X11 { .. }
    )
}

fn spawn<S>(channel: Channel<S>, leg: Leg, verdicts: Option<UnboundedSender<bool>>) -> ChannelEnd
where
    S: From<(ChannelId, ChannelMsg)> + Send + Sync + 'static,
{
    let (stdout_in_tx, stdout_in_rx) = mpsc::unbounded_channel();
    let (stdout_out_tx, stdout_out_rx) = mpsc::unbounded_channel();
    let (stderr_in_tx, stderr_in_rx) = mpsc::unbounded_channel();
    let (stderr_out_tx, stderr_out_rx) = mpsc::unbounded_channel();
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (gone_tx, gone_rx) = oneshot::channel();

    let id = channel.id();
    let label = leg.label();
    let inbound = matches!(leg, Leg::Inbound(_));
    let pending: Pending = Arc::new(Mutex::new(VecDeque::new()));
    let (read_half, write_half) = channel.split();

    let control = Arc::new(DriverControl {
        label,
        commands: commands_tx,
        verdicts,
    });

    let reader = Reader {
        id,
        label,
        inbound,
        stdout_in: Some(stdout_in_tx),
        stderr_in: Some(stderr_in_tx),
        requests: Some(requests_tx),
        pending: pending.clone(),
    };
    tokio::spawn(reader.run(read_half, gone_tx));

    let writer = Writer {
        id,
        leg,
        stdout_out: stdout_out_rx,
        stderr_out: stderr_out_rx,
        commands: commands_rx,
        pending,
    };
    tokio::spawn(writer.run(write_half, gone_rx));

    ChannelEnd {
        stdout: ByteStream {
            incoming: stdout_in_rx,
            outgoing: stdout_out_tx,
        },
        stderr: ByteStream {
            incoming: stderr_in_rx,
            outgoing: stderr_out_tx,
        },
        requests: requests_rx,
        control,
    }
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, VecDeque<oneshot::Sender<ProxyResult<bool>>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drains the channel's incoming messages into the bridge-facing pipes.
struct Reader {
    id: ChannelId,
    label: &'static str,
    inbound: bool,
    stdout_in: Option<UnboundedSender<Vec<u8>>>,
    stderr_in: Option<UnboundedSender<Vec<u8>>>,
    requests: Option<UnboundedSender<IncomingRequest>>,
    pending: Pending,
}

impl Reader {
    async fn run(mut self, mut read: ChannelReadHalf, gone: oneshot::Sender<()>) {
        let (id, label) = (self.id, self.label);
        while let Some(msg) = read.wait().await {
            match msg {
                ChannelMsg::Data { data } => {
                    if let Some(tx) = &self.stdout_in {
                        let _ = tx.send(data.to_vec());
                    }
                }
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1
                        && let Some(tx) = &self.stderr_in
                    {
                        let _ = tx.send(data.to_vec());
                    }
                }
                ChannelMsg::Eof => {
                    trace!(channel = ?id, leg = label, "peer sent eof");
                    self.stdout_in = None;
                    self.stderr_in = None;
                }
                ChannelMsg::Success => self.settle(true),
                ChannelMsg::Failure => self.settle(false),
                ChannelMsg::Close => break,
                other => {
                    if let Some(request) = decode_request(other, self.inbound)
                        && let Some(tx) = &self.requests
                    {
                        let _ = tx.send(request);
                    }
                }
            }
        }

        trace!(channel = ?id, leg = label, "peer closed channel");
        // Dropping the senders ends the bridge's copies and request loop for this side.
        self.stdout_in = None;
        self.stderr_in = None;
        self.requests = None;
        lock(&self.pending).clear();
        let _ = gone.send(());
    }

    fn settle(&self, verdict: bool) {
        if let Some(waiter) = lock(&self.pending).pop_front() {
            let _ = waiter.send(Ok(verdict));
        }
    }
}

/// Performs every send on the channel: bytes first, then requests and close.
struct Writer {
    id: ChannelId,
    leg: Leg,
    stdout_out: UnboundedReceiver<Vec<u8>>,
    stderr_out: UnboundedReceiver<Vec<u8>>,
    commands: UnboundedReceiver<Command>,
    pending: Pending,
}

impl Writer {
    async fn run<S>(mut self, write: ChannelWriteHalf<S>, mut gone: oneshot::Receiver<()>)
    where
        S: From<(ChannelId, ChannelMsg)> + Send + Sync + 'static,
    {
        let (id, label) = (self.id, self.leg.label());
        let mut stdout_open = true;
        let mut stderr_open = true;

        loop {
            tokio::select! {
                biased;

                _ = &mut gone => break,
                chunk = self.stdout_out.recv(), if stdout_open => match chunk {
                    Some(bytes) => {
                        if !until_gone(write.data(bytes.as_slice()), &mut gone).await {
                            debug!(channel = ?id, leg = label, "write stopped");
                            break;
                        }
                    }
                    None => {
                        stdout_open = false;
                        trace!(channel = ?id, leg = label, "sending eof");
                        let _ = write.eof().await;
                    }
                },
                chunk = self.stderr_out.recv(), if stderr_open => match chunk {
                    Some(bytes) => {
                        if !until_gone(write.extended_data(1, bytes.as_slice()), &mut gone).await {
                            debug!(channel = ?id, leg = label, "stderr write stopped");
                            break;
                        }
                    }
                    None => stderr_open = false,
                },
                command = self.commands.recv() => match command {
                    Some(Command::Request { request, want_reply, reply }) => {
                        self.request(&write, request, want_reply, reply).await;
                    }
                    Some(Command::Close) | None => break,
                },
            }
        }

        let _ = write.close().await;
        debug!(channel = ?id, leg = label, "channel writer finished");
    }

    async fn request<S>(&self, write: &ChannelWriteHalf<S>, request: ChannelRequest, want_reply: bool, reply: oneshot::Sender<ProxyResult<bool>>)
    where
        S: From<(ChannelId, ChannelMsg)> + Send + Sync + 'static,
    {
        let kind = request.kind();
        match plan(&self.leg, &request, want_reply) {
            Dispatch::Refused => {
                debug!(channel = ?self.id, leg = self.leg.label(), request = kind, "refusing request");
                let _ = reply.send(Ok(false));
            }
            Dispatch::Sent => {
                let sent = execute(write, &self.leg, self.id, request, want_reply).await;
                let _ = reply.send(sent.map(|()| true));
            }
            Dispatch::AwaitReply => {
                // Queued before sending so the peer's answer always finds its waiter.
                lock(&self.pending).push_back(reply);
                if let Err(err) = execute(write, &self.leg, self.id, request, want_reply).await
                    && let Some(reply) = lock(&self.pending).pop_back()
                {
                    let _ = reply.send(Err(err));
                }
            }
        }
    }
}

/// Run a write unless the peer goes away first. Returns whether driving should continue.
async fn until_gone(write: impl Future<Output = Result<(), russh::Error>>, gone: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        biased;
        _ = gone => false,
        written = write => written.is_ok(),
    }
}

fn plan(leg: &Leg, request: &ChannelRequest, want_reply: bool) -> Dispatch {
    match leg {
        // A server may only send exit reports to its client.
        Leg::Inbound(_) => match request {
            ChannelRequest::ExitStatus { .. } | ChannelRequest::ExitSignal { .. } => Dispatch::Sent,
            _ => Dispatch::Refused,
        },
        Leg::Outbound => match request {
            // Follow-up channels for agent and X11 forwarding are not relayed, so these stay local.
            ChannelRequest::X11 { .. } | ChannelRequest::AgentForward => Dispatch::Refused,
            ChannelRequest::ExitStatus { .. } | ChannelRequest::ExitSignal { .. } => Dispatch::Refused,
            ChannelRequest::WindowChange { .. } | ChannelRequest::Signal { .. } => Dispatch::Sent,
            _ if want_reply => Dispatch::AwaitReply,
            _ => Dispatch::Sent,
        },
    }
}

async fn execute<S>(write: &ChannelWriteHalf<S>, leg: &Leg, id: ChannelId, request: ChannelRequest, want_reply: bool) -> ProxyResult<()>
where
    S: From<(ChannelId, ChannelMsg)> + Send + Sync + 'static,
{
    if let Leg::Inbound(handle) = leg {
        let sent = match request {
            ChannelRequest::ExitStatus { code } => handle.exit_status_request(id, code).await,
            ChannelRequest::ExitSignal {
                signal,
                core_dumped,
                message,
                lang,
            } => handle.exit_signal_request(id, signal, core_dumped, message, lang).await,
            _ => return Ok(()),
        };
        return sent.map_err(|_| ProxyError::ChannelClosed("local"));
    }

    match request {
        ChannelRequest::Pty {
            term,
            col_width,
            row_height,
            pix_width,
            pix_height,
            modes,
        } => {
            write
                .request_pty(want_reply, &term, col_width, row_height, pix_width, pix_height, &modes)
                .await?
        }
        ChannelRequest::Shell => write.request_shell(want_reply).await?,
        ChannelRequest::Exec { command } => write.exec(want_reply, command).await?,
        ChannelRequest::Env { name, value } => write.set_env(want_reply, name, value).await?,
        ChannelRequest::Subsystem { name } => write.request_subsystem(want_reply, name).await?,
        ChannelRequest::WindowChange {
            col_width,
            row_height,
            pix_width,
            pix_height,
        } => write.window_change(col_width, row_height, pix_width, pix_height).await?,
        ChannelRequest::Signal { signal } => write.signal(signal).await?,
        ChannelRequest::X11 { .. } | ChannelRequest::AgentForward | ChannelRequest::ExitStatus { .. } | ChannelRequest::ExitSignal { .. } => {}
    }
    Ok(())
}

/// Map a channel message carrying a request onto [`IncomingRequest`].
///
/// russh answers agent forwarding on the server side itself, so it is not surfaced for inbound channels.
/// On inbound channels the requests in [`answered_in_callback`] always want a reply: the handler
/// callback consumes one verdict for each of them.
fn decode_request(msg: ChannelMsg, inbound: bool) -> Option<IncomingRequest> {
    let (request, want_reply) = match msg {
        ChannelMsg::RequestPty {
            want_reply,
            term,
            col_width,
            row_height,
            pix_width,
            pix_height,
            terminal_modes,
        } => (
            ChannelRequest::Pty {
                term,
                col_width,
                row_height,
                pix_width,
                pix_height,
                modes: terminal_modes,
            },
            want_reply,
        ),
        ChannelMsg::RequestShell { want_reply } => (ChannelRequest::Shell, want_reply),
        ChannelMsg::Exec { want_reply, command } => (ChannelRequest::Exec { command }, want_reply),
        ChannelMsg::SetEnv {
            want_reply,
            variable_name,
            variable_value,
        } => (
            ChannelRequest::Env {
                name: variable_name,
                value: variable_value,
            },
            want_reply,
        ),
        ChannelMsg::RequestSubsystem { want_reply, name } => (ChannelRequest::Subsystem { name }, want_reply),
        ChannelMsg::WindowChange {
            col_width,
            row_height,
            pix_width,
            pix_height,
        } => (
            ChannelRequest::WindowChange {
                col_width,
                row_height,
                pix_width,
                pix_height,
            },
            false,
        ),
        ChannelMsg::Signal { signal } => (ChannelRequest::Signal { signal }, false),
        ChannelMsg::RequestX11 {
            want_reply,
            single_connection,
            x11_authentication_protocol,
            x11_authentication_cookie,
            x11_screen_number,
        } => (
            ChannelRequest::X11 {
                single_connection,
                auth_protocol: x11_authentication_protocol,
                auth_cookie: x11_authentication_cookie,
                screen: x11_screen_number,
            },
            want_reply,
        ),
        ChannelMsg::AgentForward { want_reply } if !inbound => (ChannelRequest::AgentForward, want_reply),
        ChannelMsg::ExitStatus { exit_status } => (ChannelRequest::ExitStatus { code: exit_status }, false),
        ChannelMsg::ExitSignal {
            signal_name,
            core_dumped,
            error_message,
            lang_tag,
        } => (
            ChannelRequest::ExitSignal {
                signal: signal_name,
                core_dumped,
                message: error_message,
                lang: lang_tag,
            },
            false,
        ),
        _ => return None,
    };
    let want_reply = want_reply || (inbound && answered_in_callback(&request));
    Some(IncomingRequest { request, want_reply })
}
