use thiserror::Error;

use crate::resolve::ResolveError;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("destination resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("failed to connect to {destination}: {source}")]
    Dial {
        destination: String,
        #[source]
        source: russh::Error,
    },

    #[error("{destination} rejected public key authentication for user {user}")]
    OutboundAuthRejected { destination: String, user: String },

    #[error("signer unavailable: {0}")]
    Signer(String),

    #[error("channel type {0} is not supported")]
    UnsupportedChannel(String),

    #[error("could not retrieve outbound client for connection {0}")]
    MissingOutbound(String),

    #[error("failed to open remote {kind} channel: {reason}")]
    OpenChannel { kind: String, reason: String },

    #[error("failed to forward {request} request: {reason}")]
    ForwardRequest { request: &'static str, reason: String },

    #[error("failed to reply to {request} request: {reason}")]
    ReplyRequest { request: &'static str, reason: String },

    #[error("{direction} copy error: {reason}")]
    Copy { direction: &'static str, reason: String },

    #[error("{0} channel is closed")]
    ChannelClosed(&'static str),

    #[error("failed to close {what}: {reason}")]
    Close { what: String, reason: String },

    #[error("listener error: {0}")]
    Listener(#[source] std::io::Error),

    #[error("session with {peer} failed: {source}")]
    Session {
        peer: String,
        #[source]
        source: russh::Error,
    },

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
}

impl ProxyError {
    pub fn open_channel(kind: impl Into<String>, reason: impl ToString) -> Self {
        Self::OpenChannel {
            kind: kind.into(),
            reason: reason.to_string(),
        }
    }

    pub fn close(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Close {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error only says the other end is already gone.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed(_))
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
