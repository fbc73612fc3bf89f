//! Connection lifecycle hooks: accept, authenticate, channel open.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, info};
use tssh_types::parse_login_target;

use crate::{
    acceptor::{ChannelAcceptor, ChannelRejection, PendingChannel}, channel::ChannelKind, context::ConnectionContext, outbound::{DialTarget, Dialer}, report::ErrorReporter, resolve::DestinationResolver
};

/// Outcome of a public-key authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Accept,
    Reject,
}

/// Hooks the russh handler calls for every connection, in order: accept, authenticate, channel open.
#[async_trait]
pub trait ConnectionLifecycle: Send + Sync {
    fn on_accept(&self, peer: Option<SocketAddr>) -> ConnectionContext;

    /// Resolve the destination for `login` and dial it. Failures are reported, never returned.
    async fn on_authenticate(&self, ctx: &mut ConnectionContext, login: &str) -> AuthDecision;

    fn on_channel_open(&self, ctx: &ConnectionContext, kind: ChannelKind) -> Result<PendingChannel, ChannelRejection>;
}

/// State shared by every connection of one [`super::ProxyServer`].
pub struct ProxyCore {
    resolver: Arc<dyn DestinationResolver>,
    dialer: Arc<dyn Dialer>,
    acceptor: ChannelAcceptor,
    reporter: ErrorReporter,
    default_device: Option<String>,
}

impl ProxyCore {
    pub fn new(
        resolver: Arc<dyn DestinationResolver>,
        dialer: Arc<dyn Dialer>,
        reporter: ErrorReporter,
        default_device: Option<String>,
    ) -> Self {
        Self {
            resolver,
            dialer,
            acceptor: ChannelAcceptor::new(reporter.clone()),
            reporter,
            default_device,
        }
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }
}

#[async_trait]
impl ConnectionLifecycle for ProxyCore {
    fn on_accept(&self, peer: Option<SocketAddr>) -> ConnectionContext {
        let mut ctx = ConnectionContext::new(peer);
        ctx.set_device(self.default_device.clone());
        ctx
    }

    async fn on_authenticate(&self, ctx: &mut ConnectionContext, login: &str) -> AuthDecision {
        if ctx.outbound().is_some() {
            debug!(connection = %ctx.id(), "outbound client already established");
            return AuthDecision::Accept;
        }
        if ctx.dial_failed() {
            debug!(connection = %ctx.id(), "destination already failed; rejecting key");
            return AuthDecision::Reject;
        }

        ctx.apply_login(parse_login_target(login));
        let destination = match self.resolver.resolve(ctx) {
            Ok(destination) => destination,
            Err(err) => {
                ctx.mark_dial_failed();
                self.reporter.report(err.into());
                return AuthDecision::Reject;
            }
        };

        let target = DialTarget {
            destination: destination.clone(),
            user: ctx.user().unwrap_or(login).to_string(),
            client_ident: ctx.client_ident().map(str::to_string),
        };
        match self.dialer.dial(&target).await {
            Ok(session) => {
                info!(
                    connection = %ctx.id(),
                    user = %target.user,
                    destination = %destination,
                    "outbound client authenticated"
                );
                ctx.install_outbound(session);
                ctx.set_destination(destination);
                AuthDecision::Accept
            }
            Err(err) => {
                ctx.mark_dial_failed();
                self.reporter.report(err);
                AuthDecision::Reject
            }
        }
    }

    fn on_channel_open(&self, ctx: &ConnectionContext, kind: ChannelKind) -> Result<PendingChannel, ChannelRejection> {
        self.acceptor.admit(ctx, kind)
    }
}
