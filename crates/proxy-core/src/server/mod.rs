//! Proxy listener: accepts TCP connections and runs one russh session per connection.

use std::{
    io, net::SocketAddr, sync::{Arc, Mutex, PoisonError}, time::Duration
};

use russh::{
    MethodKind, MethodSet, SshId, keys::PrivateKey, server::{self as ssh_server}
};
use tokio::{
    io::{AsyncRead, AsyncWrite}, net::{TcpListener, TcpStream}, sync::{mpsc, watch}
};
use tracing::{debug, info, warn};
use tssh_types::ProxySettings;

use crate::{
    error::{ProxyError, ProxyResult}, outbound::Dialer, report::ErrorReporter, resolve::DestinationResolver
};

mod conn;
mod handler;
mod lifecycle;

pub use conn::InboundConnection;
use handler::{ProxyHandler, display_addr};
pub use lifecycle::{AuthDecision, ConnectionLifecycle, ProxyCore};

/// One SSH proxy listener.
///
/// Owns its error stream and stops accepting once the shutdown signal turns `true` or its sender
/// is dropped. Connections already running are left to finish on their own.
pub struct ProxyServer {
    core: Arc<ProxyCore>,
    ssh_config: Arc<ssh_server::Config>,
    settings: ProxySettings,
    errors: Mutex<Option<mpsc::Receiver<ProxyError>>>,
    shutdown: watch::Receiver<bool>,
}

impl ProxyServer {
    pub fn new(
        settings: ProxySettings,
        host_key: PrivateKey,
        resolver: Arc<dyn DestinationResolver>,
        dialer: Arc<dyn Dialer>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (reporter, errors) = ErrorReporter::channel(settings.error_buffer);
        let core = ProxyCore::new(resolver, dialer, reporter, settings.default_device.clone());
        Self {
            core: Arc::new(core),
            ssh_config: Arc::new(server_config(&settings, host_key)),
            settings,
            errors: Mutex::new(Some(errors)),
            shutdown,
        }
    }

    /// The error stream. Handed out once; later calls return `None`.
    pub fn errors(&self) -> Option<mpsc::Receiver<ProxyError>> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Bind the configured address and serve until shutdown or a fatal listener error.
    pub async fn start(&self) -> ProxyResult<()> {
        let listener = TcpListener::bind(self.settings.listen.as_str())
            .await
            .map_err(ProxyError::Listener)?;
        match listener.local_addr() {
            Ok(addr) => info!(listen = %addr, ident = %self.settings.server_ident(), "ssh proxy listening"),
            Err(_) => info!(listen = %self.settings.listen, "ssh proxy listening"),
        }
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener. The listener is closed when this returns.
    pub async fn serve(&self, listener: TcpListener) -> ProxyResult<()> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow_and_update() {
            info!("shutdown already requested; not accepting");
            return Ok(());
        }

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        info!("shutdown requested; no longer accepting connections");
                        return Ok(());
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(err) if is_transient(&err) => {
                        self.core.reporter().report(ProxyError::Listener(err));
                    }
                    Err(err) => {
                        warn!(error = %err, "listener failed");
                        return Err(ProxyError::Listener(err));
                    }
                },
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %err, "could not set TCP_NODELAY");
        }
        tokio::spawn(run_connection(
            self.core.clone(),
            self.ssh_config.clone(),
            stream,
            Some(peer),
            self.settings.max_session,
        ));
    }
}

/// russh server configuration: shared crypto preferences, public-key auth only.
fn server_config(settings: &ProxySettings, host_key: PrivateKey) -> ssh_server::Config {
    let mut config = ssh_server::Config {
        server_id: SshId::Standard(settings.server_ident().into()),
        preferred: ssh_core::crypto::default_preferred(),
        auth_rejection_time: Duration::from_millis(250),
        auth_rejection_time_initial: Some(Duration::from_millis(0)),
        inactivity_timeout: settings.idle_timeout,
        nodelay: true,
        ..Default::default()
    };
    config.methods = MethodSet::empty();
    config.methods.push(MethodKind::PublicKey);
    config.keys.push(host_key);
    config
}

/// Drive one inbound connection to completion.
async fn run_connection<S>(
    core: Arc<ProxyCore>,
    config: Arc<ssh_server::Config>,
    stream: S,
    peer: Option<SocketAddr>,
    max_session: Option<Duration>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ctx = core.on_accept(peer);
    let connection = ctx.id();
    info!(peer = %display_addr(peer), %connection, "client connected");

    let stream = InboundConnection::new(stream, ctx.cleanup(core.reporter().clone()), ctx.ident_sink());
    let handler = ProxyHandler::new(core.clone(), ctx);

    let session = async {
        let running = ssh_server::run_stream(config, stream, handler).await?;
        running.await
    };

    let result = match max_session {
        Some(limit) => match tokio::time::timeout(limit, session).await {
            Ok(result) => result,
            Err(_) => {
                info!(peer = %display_addr(peer), %connection, "maximum session time reached; closing");
                Ok(())
            }
        },
        None => session.await,
    };

    match result {
        Ok(()) => info!(peer = %display_addr(peer), %connection, "client disconnected"),
        Err(err) if is_benign(&err) => {
            debug!(peer = %display_addr(peer), %connection, error = %err, "session ended")
        }
        Err(source) => core.reporter().report(ProxyError::Session {
            peer: display_addr(peer),
            source,
        }),
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Session endings that are part of normal operation.
fn is_benign(err: &russh::Error) -> bool {
    match err {
        russh::Error::Disconnect | russh::Error::HUP | russh::Error::InactivityTimeout => true,
        russh::Error::IO(io) => matches!(io.kind(), io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset),
        _ => false,
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
