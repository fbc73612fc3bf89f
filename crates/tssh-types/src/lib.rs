//! Shared type definitions for tssh
//!
//! Lightweight configuration, directory and login types used by both the proxy core and the
//! `tssh` binary. Nothing in here touches the network.

pub mod config;
pub mod directory;
pub mod error;
pub mod login;
pub mod net;

pub use config::ProxySettings;
pub use directory::{DeviceEntry, DirectoryFile};
pub use error::ConfigError;
pub use login::{LoginTarget, parse_login_target};
pub use net::{DEFAULT_SSH_PORT, Endpoint, parse_endpoint};
