use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in SSH core operations
#[derive(Error, Debug)]
pub enum SshCoreError {
    /// Key material could not be parsed or encoded
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Encrypted key supplied without a passphrase
    #[error("encrypted private key requires a passphrase")]
    PassphraseRequired,

    /// Key file could not be read or written
    #[error("key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unknown log level name
    #[error("unknown log level '{0}'")]
    InvalidLevel(String),
}

/// Result type alias for SSH core operations
pub type SshResult<T> = Result<T, SshCoreError>;

impl SshCoreError {
    /// Create an invalid key error
    pub fn invalid_key(message: impl ToString) -> Self {
        Self::InvalidKey(message.to_string())
    }

    /// Attach a path to an I/O failure on a key file
    pub fn key_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::KeyFile { path: path.into(), source }
    }
}
