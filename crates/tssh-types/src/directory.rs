//! Device directory file format.
//!
//! ```json
//! { "default": "web", "devices": [ { "name": "web", "address": "10.0.0.5", "port": 22, "host_key": "ssh-ed25519 AAAA..." } ] }
//! ```
use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError, net::{Endpoint, parse_endpoint}
};

/// One reachable device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Name clients select with `user:name`.
    pub name: String,
    /// Hostname or IP, optionally with `:port`.
    pub address: String,
    /// Port override; wins over a port embedded in `address`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Pinned host key in OpenSSH public key format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key: Option<String>,
}

impl DeviceEntry {
    /// Dialable endpoint for this device.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let mut endpoint = parse_endpoint(&self.address)?;
        if let Some(port) = self.port {
            endpoint.port = port;
        }
        Ok(endpoint)
    }

    /// Parse a `NAME=HOST[:PORT]` command-line spec.
    pub fn from_spec(spec: &str) -> Result<Self, ConfigError> {
        let (name, address) = spec
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidDeviceSpec(spec.to_string()))?;
        let name = name.trim();
        if name.is_empty() || address.trim().is_empty() {
            return Err(ConfigError::InvalidDeviceSpec(spec.to_string()));
        }
        parse_endpoint(address)?;
        Ok(Self {
            name: name.to_string(),
            address: address.trim().to_string(),
            port: None,
            host_key: None,
        })
    }
}

/// Serialized device directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryFile {
    /// Device used when a login names none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl DirectoryFile {
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let file: DirectoryFile = serde_json::from_str(data)?;
        file.validate()?;
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&data)
    }

    /// Check names are unique, addresses parse and the default exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.name.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.name.clone()));
            }
            device.endpoint()?;
        }
        if let Some(default) = &self.default
            && !seen.contains(default.as_str())
        {
            return Err(ConfigError::UnknownDefault(default.clone()));
        }
        Ok(())
    }
}
