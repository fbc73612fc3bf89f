//! SSH proxy core: accepts inbound SSH connections, dials the resolved destination as a client and
//! mirrors every channel between the two.

pub mod acceptor;
pub mod bridge;
pub mod channel;
pub mod context;
pub mod error;
pub mod forward;
pub mod outbound;
pub mod report;
pub mod resolve;
pub mod server;
pub mod signer;

#[cfg(test)]
mod test_support;

pub use acceptor::{ChannelAcceptor, ChannelRejection, PendingChannel};
pub use bridge::Bridge;
pub use channel::{ChannelControl, ChannelEnd, ChannelKind, ChannelRequest, IncomingRequest};
pub use context::ConnectionContext;
pub use error::{ProxyError, ProxyResult};
pub use outbound::{DialTarget, Dialer, OutboundSession, SshDialer};
pub use report::ErrorReporter;
pub use resolve::{Destination, DestinationResolver, DeviceDirectory, ResolveError, StaticResolver};
pub use server::{AuthDecision, ConnectionLifecycle, ProxyCore, ProxyServer};
pub use signer::{IdentityFile, SignerProvider};
