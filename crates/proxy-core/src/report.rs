//! Non-blocking error stream owned by a proxy instance.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::error::ProxyError;

/// Sending half of a server's error stream.
///
/// Reporting never waits: when nobody drains the stream, or it is full, the error is logged and dropped.
#[derive(Clone, Debug)]
pub struct ErrorReporter {
    tx: mpsc::Sender<ProxyError>,
}

impl ErrorReporter {
    /// Create a reporter and the receiver that [`crate::ProxyServer::errors`] hands out.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProxyError>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn report(&self, error: ProxyError) {
        warn!(error = %error, "proxy fault");
        match self.tx.try_send(error) {
            Ok(()) => {}
            Err(TrySendError::Full(error)) => debug!(error = %error, "error stream full; dropping"),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
