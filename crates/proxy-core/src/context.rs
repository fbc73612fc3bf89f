//! Per-connection state.
//!
//! A [`ConnectionContext`] is created when a TCP connection is accepted, filled in during
//! authentication and read by every channel open on that connection. It is never shared across
//! connections; the pieces that outlive the handler (outbound slot, identification sink) are
//! reference counted so the transport wrapper can reach them.

use std::{
    net::SocketAddr, sync::{Arc, Mutex, OnceLock, PoisonError}
};

use tracing::{debug, info};
use tssh_types::LoginTarget;
use uuid::Uuid;

use crate::{
    outbound::OutboundSession, report::ErrorReporter, resolve::Destination
};

type Slot = Arc<Mutex<Option<Arc<dyn OutboundSession>>>>;

pub struct ConnectionContext {
    id: Uuid,
    peer: Option<SocketAddr>,
    device: Option<String>,
    login: Option<LoginTarget>,
    destination: Option<Destination>,
    client_ident: Arc<OnceLock<String>>,
    outbound: Slot,
    dial_failed: bool,
}

impl ConnectionContext {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            id: Uuid::now_v7(),
            peer,
            device: None,
            login: None,
            destination: None,
            client_ident: Arc::new(OnceLock::new()),
            outbound: Arc::new(Mutex::new(None)),
            dial_failed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Device selected for this connection, if any.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn set_device(&mut self, device: Option<String>) {
        self.device = device;
    }

    /// Record the parsed login. A device named in the login replaces the one chosen at accept time.
    pub fn apply_login(&mut self, login: LoginTarget) {
        if let Some(device) = &login.device {
            self.device = Some(device.clone());
        }
        self.login = Some(login);
    }

    /// User name to authenticate as on the destination.
    pub fn user(&self) -> Option<&str> {
        self.login.as_ref().map(|l| l.username.as_str())
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn set_destination(&mut self, destination: Destination) {
        self.destination = Some(destination);
    }

    /// Identification string the client sent (`SSH-2.0-...`), once it has been seen.
    pub fn client_ident(&self) -> Option<&str> {
        self.client_ident.get().map(String::as_str)
    }

    /// Cell the transport wrapper fills with the client's identification string.
    pub fn ident_sink(&self) -> Arc<OnceLock<String>> {
        self.client_ident.clone()
    }

    /// Outbound client for this connection, once authentication has dialled it.
    pub fn outbound(&self) -> Option<Arc<dyn OutboundSession>> {
        lock(&self.outbound).clone()
    }

    pub fn install_outbound(&self, session: Arc<dyn OutboundSession>) {
        *lock(&self.outbound) = Some(session);
    }

    /// Whether resolving or dialling the destination already failed on this connection.
    pub fn dial_failed(&self) -> bool {
        self.dial_failed
    }

    pub fn mark_dial_failed(&mut self) {
        self.dial_failed = true;
    }

    /// Cleanup that closes the outbound client when the inbound transport goes away.
    pub fn cleanup(&self, reporter: ErrorReporter) -> ConnectionCleanup {
        ConnectionCleanup {
            connection: self.id,
            slot: self.outbound.clone(),
            reporter,
        }
    }
}

fn lock(slot: &Slot) -> std::sync::MutexGuard<'_, Option<Arc<dyn OutboundSession>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Closes a connection's outbound client. Consumed by [`ConnectionCleanup::run`], so it runs at most once.
pub struct ConnectionCleanup {
    connection: Uuid,
    slot: Slot,
    reporter: ErrorReporter,
}

impl ConnectionCleanup {
    /// Take the outbound client out of the slot and close it; a no-op when none was ever stored.
    ///
    /// The close itself is asynchronous and runs on the current runtime.
    pub fn run(self) {
        let Some(session) = lock(&self.slot).take() else {
            debug!(connection = %self.connection, "no outbound client to close");
            return;
        };

        let connection = self.connection;
        let reporter = self.reporter;
        let close = async move {
            match session.close().await {
                Ok(()) => info!(%connection, destination = %session.destination(), "closed outbound client"),
                Err(err) if err.is_channel_closed() => {}
                Err(err) => reporter.report(err),
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(close);
            }
            Err(_) => debug!(%connection, "no runtime available; outbound client dropped without disconnect"),
        }
    }
}
