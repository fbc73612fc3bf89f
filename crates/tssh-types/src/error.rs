use thiserror::Error;

/// Errors raised while parsing configuration or directory input.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("endpoint must not be empty")]
    EmptyEndpoint,

    #[error("endpoint host is missing")]
    EmptyHost,

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("invalid device entry '{0}': expected NAME=HOST[:PORT]")]
    InvalidDeviceSpec(String),

    #[error("device '{0}' is listed more than once")]
    DuplicateDevice(String),

    #[error("default device '{0}' is not in the directory")]
    UnknownDefault(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
