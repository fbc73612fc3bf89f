//! Channel model shared by both legs.
//!
//! A [`ChannelEnd`] is what the bridge sees of one SSH channel: byte pipes for the primary and
//! stderr streams, the requests the peer sent, and a [`ChannelControl`] to act on the channel.
//! For russh channels a driver task (see [`driver`]) owns the channel and services all of these.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use russh::{Pty, Sig};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::error::ProxyResult;

pub(crate) mod driver;

/// Channel types as they appear in `SSH_MSG_CHANNEL_OPEN`, with their type-specific data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Session,
    DirectTcpip {
        host_to_connect: String,
        port_to_connect: u32,
        originator_address: String,
        originator_port: u32,
    },
    Other(String),
}

impl ChannelKind {
    /// Wire name of the channel type.
    pub fn name(&self) -> &str {
        match self {
            Self::Session => "session",
            Self::DirectTcpip { .. } => "direct-tcpip",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectTcpip {
                host_to_connect,
                port_to_connect,
                ..
            } => write!(f, "direct-tcpip to {host_to_connect}:{port_to_connect}"),
            other => f.write_str(other.name()),
        }
    }
}

/// A typed `SSH_MSG_CHANNEL_REQUEST`.
#[derive(Clone, Debug)]
pub enum ChannelRequest {
    Pty {
        term: String,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: Vec<(Pty, u32)>,
    },
    Shell,
    Exec {
        command: Vec<u8>,
    },
    Env {
        name: String,
        value: String,
    },
    Subsystem {
        name: String,
    },
    WindowChange {
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
    },
    Signal {
        signal: Sig,
    },
    X11 {
        single_connection: bool,
        auth_protocol: String,
        auth_cookie: String,
        screen: u32,
    },
    AgentForward,
    ExitStatus {
        code: u32,
    },
    ExitSignal {
        signal: Sig,
        core_dumped: bool,
        message: String,
        lang: String,
    },
}

impl ChannelRequest {
    /// SSH request type string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pty { .. } => "pty-req",
            Self::Shell => "shell",
            Self::Exec { .. } => "exec",
            Self::Env { .. } => "env",
            Self::Subsystem { .. } => "subsystem",
            Self::WindowChange { .. } => "window-change",
            Self::Signal { .. } => "signal",
            Self::X11 { .. } => "x11-req",
            Self::AgentForward => "auth-agent-req@openssh.com",
            Self::ExitStatus { .. } => "exit-status",
            Self::ExitSignal { .. } => "exit-signal",
        }
    }
}

/// A request received from the peer of a channel end.
#[derive(Clone, Debug)]
pub struct IncomingRequest {
    pub request: ChannelRequest,
    pub want_reply: bool,
}

/// Operations on a channel other than moving bytes.
#[async_trait]
pub trait ChannelControl: Send + Sync {
    /// Send `request` to this channel's peer.
    ///
    /// With `want_reply` the peer's verdict is returned; without it the result is `true` once sent.
    /// Requests this end cannot carry are refused and report `false`.
    async fn send_request(&self, request: ChannelRequest, want_reply: bool) -> ProxyResult<bool>;

    /// Answer the oldest request received on this channel that wanted a reply.
    async fn reply(&self, success: bool) -> ProxyResult<()>;

    /// Close the channel. Closing twice, or after the peer closed, is not an error worth reporting.
    async fn close(&self) -> ProxyResult<()>;
}

/// One direction-pair of bytes: what the peer sent us, and where to put what we send it.
///
/// Dropping `outgoing` signals end-of-stream to the peer.
pub struct ByteStream {
    pub incoming: UnboundedReceiver<Vec<u8>>,
    pub outgoing: UnboundedSender<Vec<u8>>,
}

/// One side of a proxied channel.
pub struct ChannelEnd {
    pub stdout: ByteStream,
    pub stderr: ByteStream,
    pub requests: UnboundedReceiver<IncomingRequest>,
    pub control: Arc<dyn ChannelControl>,
}
