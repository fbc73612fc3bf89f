//! Key material for authenticating to destinations.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use russh::keys::PrivateKey;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};

/// Supplies the private key used to authenticate `user` on a destination.
///
/// Called once per connection, when the outbound client is dialled.
#[async_trait]
pub trait SignerProvider: Send + Sync {
    async fn signer(&self, user: &str) -> ProxyResult<Arc<PrivateKey>>;
}

/// Reads the key from disk on every dial, so a rotated key file is picked up without a restart.
pub struct IdentityFile {
    path: PathBuf,
    passphrase: Option<SecretString>,
}

impl IdentityFile {
    pub fn new(path: impl Into<PathBuf>, passphrase: Option<SecretString>) -> Self {
        Self {
            path: path.into(),
            passphrase,
        }
    }
}

#[async_trait]
impl SignerProvider for IdentityFile {
    async fn signer(&self, user: &str) -> ProxyResult<Arc<PrivateKey>> {
        let passphrase = self.passphrase.as_ref().map(|p| p.expose_secret());
        let key = ssh_core::keys::load_private_key_file(&self.path, passphrase)
            .await
            .map_err(|err| ProxyError::Signer(format!("{}: {err}", self.path.display())))?;
        debug!(user, path = %self.path.display(), "loaded identity for outbound authentication");
        Ok(Arc::new(key))
    }
}
