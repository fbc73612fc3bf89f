//! Destination resolution.
//!
//! The resolver is consulted once per connection, during authentication, with the connection's context.

use std::{collections::HashMap, fmt};

use thiserror::Error;
use tssh_types::{DeviceEntry, DirectoryFile, Endpoint};

use crate::context::ConnectionContext;

/// Where an authenticated connection is forwarded to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    /// Directory name of the device, when it came from one.
    pub device: Option<String>,
    pub endpoint: Endpoint,
    /// Pinned host key (OpenSSH public key format).
    pub host_key: Option<String>,
}

impl Destination {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            device: None,
            endpoint,
            host_key: None,
        }
    }

    /// `host:port` to dial.
    pub fn address(&self) -> String {
        self.endpoint.to_string()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(device) => write!(f, "{device} ({})", self.endpoint),
            None => write!(f, "{}", self.endpoint),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no device selected for {user}")]
    NoDevice { user: String },

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("device '{device}' has an invalid address: {reason}")]
    InvalidAddress { device: String, reason: String },
}

/// Maps a connection to the destination it should be forwarded to.
pub trait DestinationResolver: Send + Sync {
    fn resolve(&self, ctx: &ConnectionContext) -> Result<Destination, ResolveError>;
}

/// Sends every connection to the same destination.
#[derive(Clone, Debug)]
pub struct StaticResolver {
    destination: Destination,
}

impl StaticResolver {
    pub fn new(destination: Destination) -> Self {
        Self { destination }
    }
}

impl DestinationResolver for StaticResolver {
    fn resolve(&self, _ctx: &ConnectionContext) -> Result<Destination, ResolveError> {
        Ok(self.destination.clone())
    }
}

/// Resolves the device selected on the connection against a fixed set of devices.
#[derive(Clone, Debug, Default)]
pub struct DeviceDirectory {
    devices: HashMap<String, DeviceEntry>,
    default: Option<String>,
}

impl DeviceDirectory {
    pub fn new(devices: impl IntoIterator<Item = DeviceEntry>) -> Self {
        Self {
            devices: devices.into_iter().map(|d| (d.name.clone(), d)).collect(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.default = default;
        self
    }

    /// Device used for connections whose login names none.
    pub fn default_device(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// All devices, sorted by name.
    pub fn devices(&self) -> Vec<&DeviceEntry> {
        let mut devices: Vec<_> = self.devices.values().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    pub fn lookup(&self, name: &str) -> Result<Destination, ResolveError> {
        let entry = self
            .devices
            .get(name)
            .ok_or_else(|| ResolveError::UnknownDevice(name.to_string()))?;
        let endpoint = entry.endpoint().map_err(|err| ResolveError::InvalidAddress {
            device: name.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Destination {
            device: Some(entry.name.clone()),
            endpoint,
            host_key: entry.host_key.clone(),
        })
    }
}

impl From<DirectoryFile> for DeviceDirectory {
    fn from(file: DirectoryFile) -> Self {
        Self::new(file.devices).with_default(file.default)
    }
}

impl DestinationResolver for DeviceDirectory {
    fn resolve(&self, ctx: &ConnectionContext) -> Result<Destination, ResolveError> {
        match ctx.device().or(self.default.as_deref()) {
            Some(device) => self.lookup(device),
            None => Err(ResolveError::NoDevice {
                user: ctx.user().unwrap_or("<unauthenticated>").to_string(),
            }),
        }
    }
}
