//! Admission and mirroring of inbound channel opens.

use std::{fmt, sync::Arc};

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    bridge::Bridge, channel::{ChannelEnd, ChannelKind}, context::ConnectionContext, error::ProxyError, outbound::OutboundSession, report::ErrorReporter
};

/// Why a channel open was refused.
///
/// russh answers every refused open with `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED`, so the message
/// only reaches the logs and the error stream.
#[derive(Debug)]
pub struct ChannelRejection {
    pub message: String,
}

impl fmt::Display for ChannelRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Decides which channel opens are proxied.
#[derive(Clone)]
pub struct ChannelAcceptor {
    reporter: ErrorReporter,
}

impl ChannelAcceptor {
    pub fn new(reporter: ErrorReporter) -> Self {
        Self { reporter }
    }

    /// Admit `session` and `direct-tcpip` channels; refuse every other type.
    ///
    /// A refusal is reported on the error stream and leaves the connection untouched.
    pub fn admit(&self, ctx: &ConnectionContext, kind: ChannelKind) -> Result<PendingChannel, ChannelRejection> {
        match kind {
            ChannelKind::Session | ChannelKind::DirectTcpip { .. } => {
                debug!(connection = %ctx.id(), channel = %kind, "admitting channel");
                Ok(PendingChannel {
                    connection: ctx.id(),
                    kind,
                    outbound: ctx.outbound(),
                    reporter: self.reporter.clone(),
                })
            }
            ChannelKind::Other(name) => {
                let err = ProxyError::UnsupportedChannel(name);
                let rejection = ChannelRejection {
                    message: err.to_string(),
                };
                self.reporter.report(err);
                Err(rejection)
            }
        }
    }
}

/// An admitted channel waiting for its outbound mirror.
pub struct PendingChannel {
    connection: Uuid,
    kind: ChannelKind,
    outbound: Option<Arc<dyn OutboundSession>>,
    reporter: ErrorReporter,
}

impl PendingChannel {
    /// Open the mirrored channel on the outbound client and bridge the two until they wind down.
    ///
    /// Without an outbound client, or when the destination refuses the open, the accepted inbound
    /// channel is closed again and the fault reported.
    pub async fn establish(self, local: ChannelEnd) {
        let PendingChannel {
            connection,
            kind,
            outbound,
            reporter,
        } = self;

        let Some(outbound) = outbound else {
            reporter.report(ProxyError::MissingOutbound(connection.to_string()));
            close_local(&local, &reporter).await;
            return;
        };

        let remote = match outbound.open_channel(&kind).await {
            Ok(remote) => remote,
            Err(err) => {
                reporter.report(err);
                close_local(&local, &reporter).await;
                return;
            }
        };

        info!(%connection, channel = %kind, destination = %outbound.destination(), "channel bridged");
        Bridge::new(local, remote, reporter).run().await;
        debug!(%connection, channel = %kind, "channel finished");
    }
}

async fn close_local(local: &ChannelEnd, reporter: &ErrorReporter) {
    if let Err(err) = local.control.close().await
        && !err.is_channel_closed()
    {
        reporter.report(ProxyError::close("local channel", err));
    }
}
