//! Endpoint parsing for destination addresses.
//!
//! Destinations are stored and dialled as `host:port`; a missing port means the SSH default.

use std::fmt;

use crate::error::ConfigError;

/// Port used when a destination does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A dialable `host:port` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Hostname or IP address (IPv6 literals are kept without brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse `host`, `host:port`, `[v6]` or `[v6]:port`.
///
/// A bare IPv6 literal without brackets is accepted as a host with the default port.
pub fn parse_endpoint(input: &str) -> Result<Endpoint, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ConfigError::EmptyEndpoint);
    }

    let (host, port) = if let Some(rest) = input.strip_prefix('[') {
        match rest.split_once(']') {
            Some((host, "")) => (host.to_string(), DEFAULT_SSH_PORT),
            Some((host, tail)) => {
                let port_str = tail.strip_prefix(':').ok_or_else(|| ConfigError::InvalidPort(tail.to_string()))?;
                (host.to_string(), parse_port(port_str)?)
            }
            None => return Err(ConfigError::EmptyHost),
        }
    } else if input.matches(':').count() > 1 {
        (input.to_string(), DEFAULT_SSH_PORT)
    } else if let Some((host, port_str)) = input.rsplit_once(':') {
        (host.to_string(), parse_port(port_str)?)
    } else {
        (input.to_string(), DEFAULT_SSH_PORT)
    };

    if host.is_empty() {
        return Err(ConfigError::EmptyHost);
    }
    Ok(Endpoint { host, port })
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidPort(raw.to_string())),
        Ok(port) => Ok(port),
    }
}
