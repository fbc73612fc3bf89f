//! russh `Handler` that forwards connection events to a [`ConnectionLifecycle`].

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use russh::{
    Channel, ChannelId, Pty, keys::{HashAlg, PublicKey}, server::{Auth, Msg, Session}
};
use tracing::{debug, info, warn};

use super::lifecycle::{AuthDecision, ConnectionLifecycle};
use crate::{
    channel::{
        ChannelKind, driver::{self, Verdicts}
    }, context::ConnectionContext
};

/// How long a client request waits for the destination's verdict.
const VERDICT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection russh handler; owns the connection's context.
pub(super) struct ProxyHandler {
    lifecycle: Arc<dyn ConnectionLifecycle>,
    ctx: ConnectionContext,
    verdicts: HashMap<ChannelId, Verdicts>,
}

impl ProxyHandler {
    pub(super) fn new(lifecycle: Arc<dyn ConnectionLifecycle>, ctx: ConnectionContext) -> Self {
        Self {
            lifecycle,
            ctx,
            verdicts: HashMap::new(),
        }
    }

    fn open(&mut self, channel: Channel<Msg>, kind: ChannelKind, session: &mut Session) -> bool {
        match self.lifecycle.on_channel_open(&self.ctx, kind) {
            Ok(pending) => {
                let id = channel.id();
                let (local, verdicts) = driver::spawn_inbound(channel, session.handle());
                self.verdicts.insert(id, verdicts);
                tokio::spawn(pending.establish(local));
                true
            }
            Err(rejection) => {
                // russh answers a refused typed open with SSH_OPEN_ADMINISTRATIVELY_PROHIBITED.
                debug!(
                    peer = %display_addr(self.ctx.peer()),
                    message = %rejection,
                    "channel open rejected"
                );
                false
            }
        }
    }

    /// Reply to the client's current request on `channel` with the destination's verdict.
    ///
    /// russh drops the reply when the client did not ask for one.
    async fn answer(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), russh::Error> {
        let outcome = match self.verdicts.get_mut(&channel) {
            Some(verdicts) => Some(tokio::time::timeout(VERDICT_TIMEOUT, verdicts.recv()).await),
            None => None,
        };
        let verdict = match outcome {
            Some(Ok(Some(verdict))) => verdict,
            Some(Ok(None)) | None => false,
            Some(Err(_)) => {
                warn!(channel = ?channel, "no verdict from destination; failing request");
                // Later verdicts would no longer line up with their requests.
                self.verdicts.remove(&channel);
                false
            }
        };
        if verdict {
            session.channel_success(channel)
        } else {
            session.channel_failure(channel)
        }
    }
}

impl russh::server::Handler for ProxyHandler {
    type Error = russh::Error;

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        info!(
            peer = %display_addr(self.ctx.peer()),
            user,
            fingerprint = %public_key.fingerprint(HashAlg::Sha256),
            "public key offered"
        );
        match self.lifecycle.on_authenticate(&mut self.ctx, user).await {
            AuthDecision::Accept => Ok(Auth::Accept),
            AuthDecision::Reject => Ok(Auth::reject()),
        }
    }

    async fn channel_open_session(&mut self, channel: Channel<Msg>, session: &mut Session) -> Result<bool, Self::Error> {
        Ok(self.open(channel, ChannelKind::Session, session))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let kind = ChannelKind::DirectTcpip {
            host_to_connect: host_to_connect.to_string(),
            port_to_connect,
            originator_address: originator_address.to_string(),
            originator_port,
        };
        Ok(self.open(channel, kind, session))
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open(channel, ChannelKind::Other("x11".to_string()), session))
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open(channel, ChannelKind::Other("forwarded-tcpip".to_string()), session))
    }

    async fn channel_open_direct_streamlocal(
        &mut self,
        channel: Channel<Msg>,
        _socket_path: &str,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open(channel, ChannelKind::Other("direct-streamlocal@openssh.com".to_string()), session))
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.verdicts.remove(&channel);
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, session).await
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, session).await
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        _variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, session).await
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        self.answer(channel, session).await
    }

    async fn exec_request(&mut self, channel: ChannelId, _data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        self.answer(channel, session).await
    }

    async fn subsystem_request(&mut self, channel: ChannelId, _name: &str, session: &mut Session) -> Result<(), Self::Error> {
        self.answer(channel, session).await
    }
}

/// Display helper used for tracing; keeps logging concise when the socket address is unavailable.
pub(super) fn display_addr(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|| "<unknown>".into())
}
