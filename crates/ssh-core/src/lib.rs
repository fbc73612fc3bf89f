//! russh plumbing shared by both legs of the proxy: crypto preferences, key material and logging.

pub mod crypto;
pub mod error;
pub mod keys;
pub mod logging;

pub use error::{SshCoreError, SshResult};
