//! Outbound SSH clients toward destinations.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    channel::{ChannelEnd, ChannelKind}, error::ProxyResult, resolve::Destination
};

mod handler;
mod ssh;

pub use handler::DestinationKeyCheck;
pub use ssh::{SshDialer, SshOutbound};

/// An authenticated client connection to a destination, shared by all channels of one inbound connection.
#[async_trait]
pub trait OutboundSession: Send + Sync {
    /// `host:port` this session is connected to.
    fn destination(&self) -> &str;

    /// Open a channel of the same type, with the same type-specific data, as `kind`.
    async fn open_channel(&self, kind: &ChannelKind) -> ProxyResult<ChannelEnd>;

    /// Disconnect from the destination.
    async fn close(&self) -> ProxyResult<()>;
}

/// What to dial for an authenticated inbound connection.
#[derive(Clone, Debug)]
pub struct DialTarget {
    pub destination: Destination,
    /// User name presented to the destination.
    pub user: String,
    /// Identification string to announce, mirrored from the inbound client.
    pub client_ident: Option<String>,
}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, target: &DialTarget) -> ProxyResult<Arc<dyn OutboundSession>>;
}
