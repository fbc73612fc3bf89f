//! Bidirectional relay between an inbound channel and its outbound mirror.
//!
//! Per channel pair: two primary copy tasks, two stderr copy tasks and one request loop. Only the
//! primary copies report completion; the pair is closed once both have finished.

use std::time::Duration;

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender}, time::Instant
};
use tracing::{debug, trace};

use crate::{
    channel::{ChannelControl, ChannelEnd}, error::{ProxyError, ProxyResult}, forward::forward_request, report::ErrorReporter
};

/// Number of copy tasks whose completion ends the bridge.
const PRIMARY_COPIES: usize = 2;

/// How long requests keep flowing after both primary copies finished, so a trailing `exit-status` reaches the client.
pub const EXIT_LINGER: Duration = Duration::from_secs(1);

pub struct Bridge {
    local: ChannelEnd,
    remote: ChannelEnd,
    reporter: ErrorReporter,
}

enum LoopExit {
    /// Both primary copies finished and the linger elapsed.
    Drained,
    /// One side's request stream ended; its channel is gone.
    StreamClosed(&'static str),
    /// A request could not be relayed.
    Faulted,
}

impl Bridge {
    pub fn new(local: ChannelEnd, remote: ChannelEnd, reporter: ErrorReporter) -> Self {
        Self { local, remote, reporter }
    }

    /// Relay until the channel pair winds down, then close both ends.
    pub async fn run(self) {
        let Bridge { local, remote, reporter } = self;
        let ChannelEnd {
            stdout: local_out,
            stderr: local_err,
            requests: mut local_requests,
            control: local_control,
        } = local;
        let ChannelEnd {
            stdout: remote_out,
            stderr: remote_err,
            requests: mut remote_requests,
            control: remote_control,
        } = remote;

        let (done_tx, mut done_rx) = mpsc::channel::<&'static str>(PRIMARY_COPIES);
        spawn_copy("remote to local", remote_out.incoming, local_out.outgoing, Some(done_tx.clone()), reporter.clone());
        spawn_copy("local to remote", local_out.incoming, remote_out.outgoing, Some(done_tx), reporter.clone());
        spawn_copy("remote to local stderr", remote_err.incoming, local_err.outgoing, None, reporter.clone());
        spawn_copy("local to remote stderr", local_err.incoming, remote_err.outgoing, None, reporter.clone());

        let mut completed = 0;
        let exit = {
            let mut deadline: Option<Instant> = None;
            loop {
                tokio::select! {
                    biased;

                    request = local_requests.recv() => match request {
                        Some(request) => {
                            if let Err(err) = forward_request(request, local_control.as_ref(), remote_control.as_ref()).await {
                                reporter.report(err);
                                break LoopExit::Faulted;
                            }
                        }
                        None => break LoopExit::StreamClosed("local"),
                    },
                    request = remote_requests.recv() => match request {
                        Some(request) => {
                            if let Err(err) = forward_request(request, remote_control.as_ref(), local_control.as_ref()).await {
                                reporter.report(err);
                                break LoopExit::Faulted;
                            }
                        }
                        None => break LoopExit::StreamClosed("remote"),
                    },
                    Some(direction) = done_rx.recv(), if completed < PRIMARY_COPIES => {
                        completed += 1;
                        trace!(direction, completed, "primary copy finished");
                        if completed == PRIMARY_COPIES {
                            deadline = Some(Instant::now() + EXIT_LINGER);
                        }
                    },
                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => break LoopExit::Drained,
                }
            }
        };

        let mut closed = false;
        match exit {
            LoopExit::Drained => debug!("channel pair drained"),
            LoopExit::StreamClosed(side) => debug!(side, "channel closed by peer"),
            LoopExit::Faulted => {
                close_pair(local_control.as_ref(), remote_control.as_ref(), &reporter).await;
                closed = true;
            }
        }

        while completed < PRIMARY_COPIES {
            match done_rx.recv().await {
                Some(_) => completed += 1,
                None => break,
            }
        }

        if !closed {
            close_pair(local_control.as_ref(), remote_control.as_ref(), &reporter).await;
        }
        debug!("bridge finished");
    }
}

async fn close_pair(local: &dyn ChannelControl, remote: &dyn ChannelControl, reporter: &ErrorReporter) {
    for (what, control) in [("local channel", local), ("remote channel", remote)] {
        match control.close().await {
            Ok(()) => {}
            Err(err) if err.is_channel_closed() => {}
            Err(err) => reporter.report(ProxyError::close(what, err)),
        }
    }
}

fn spawn_copy(
    direction: &'static str,
    source: UnboundedReceiver<Vec<u8>>,
    sink: UnboundedSender<Vec<u8>>,
    done: Option<mpsc::Sender<&'static str>>,
    reporter: ErrorReporter,
) {
    tokio::spawn(async move {
        if let Err(err) = copy(direction, source, sink).await {
            reporter.report(err);
        }
        if let Some(done) = done {
            let _ = done.send(direction).await;
        }
    });
}

/// Move chunks from `source` to `sink` until the source ends or the sink's reader goes away.
///
/// Returning drops `sink`, which the far side sees as end-of-stream.
async fn copy(direction: &'static str, mut source: UnboundedReceiver<Vec<u8>>, sink: UnboundedSender<Vec<u8>>) -> ProxyResult<()> {
    let mut total = 0usize;
    loop {
        tokio::select! {
            biased;

            _ = sink.closed() => break,
            chunk = source.recv() => match chunk {
                Some(bytes) => {
                    total += bytes.len();
                    sink.send(bytes).map_err(|_| ProxyError::Copy {
                        direction,
                        reason: "receiving channel closed".to_string(),
                    })?;
                }
                None => break,
            },
        }
    }
    trace!(direction, bytes = total, "copy finished");
    Ok(())
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
