//! Runtime configuration for the proxy listener.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for one proxy listener.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Address (IP or host) and port to accept SSH connections on, e.g. `0.0.0.0:2222`.
    pub listen: String,
    /// Proxy version embedded in the SSH identification string.
    pub version: String,
    /// Close a connection after this long without traffic.
    pub idle_timeout: Option<Duration>,
    /// Hard cap on the lifetime of a single connection.
    pub max_session: Option<Duration>,
    /// How many undelivered faults the error stream holds before new ones are dropped.
    pub error_buffer: usize,
    /// Device selected for a connection whose login names none.
    pub default_device: Option<String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:2222".to_string(),
            version: "dev".to_string(),
            idle_timeout: None,
            max_session: None,
            error_buffer: 256,
            default_device: None,
        }
    }
}

impl ProxySettings {
    /// SSH identification string announced to clients: `SSH-2.0-tssh_<version>_<os>`.
    pub fn server_ident(&self) -> String {
        format!("SSH-2.0-tssh_{}_{}", self.version, std::env::consts::OS)
    }
}
