//! Private key loading and host key persistence.

use std::path::Path;

use russh::keys::{
    self, Algorithm, PrivateKey, ssh_key::{LineEnding, rand_core::OsRng}
};
use tracing::info;

use crate::error::{SshCoreError, SshResult};

/// Load a private key from string data, supporting:
/// - OpenSSH keys (encrypted keys need `passphrase`)
/// - PKCS#8 (encrypted/unencrypted)
pub fn load_private_key_from_str(data: &str, passphrase: Option<&str>) -> SshResult<PrivateKey> {
    if let Ok(key) = PrivateKey::from_openssh(data)
        && !key.is_encrypted()
    {
        return Ok(key);
    }

    match keys::decode_secret_key(data, passphrase) {
        Ok(key) => Ok(key),
        Err(keys::Error::KeyIsEncrypted) if passphrase.is_none() => Err(SshCoreError::PassphraseRequired),
        Err(err) => Err(SshCoreError::invalid_key(err)),
    }
}

/// Read and parse a private key file.
pub async fn load_private_key_file(path: &Path, passphrase: Option<&str>) -> SshResult<PrivateKey> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| SshCoreError::key_file(path, err))?;
    load_private_key_from_str(&data, passphrase)
}

/// Load the server host key from `path`, generating and persisting an Ed25519 key when the file is missing.
pub fn load_or_create_host_key(path: &Path) -> SshResult<PrivateKey> {
    match std::fs::read_to_string(path) {
        Ok(data) => {
            let key = load_private_key_from_str(&data, None)?;
            info!(path = %path.display(), fingerprint = %key.public_key().fingerprint(Default::default()), "loaded server host key");
            Ok(key)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(SshCoreError::invalid_key)?;
            let pem = key.to_openssh(LineEnding::LF).map_err(SshCoreError::invalid_key)?;
            write_private(path, pem.as_bytes())?;
            info!(path = %path.display(), fingerprint = %key.public_key().fingerprint(Default::default()), "generated new server host key");
            Ok(key)
        }
        Err(err) => Err(SshCoreError::key_file(path, err)),
    }
}

fn write_private(path: &Path, contents: &[u8]) -> SshResult<()> {
    use std::io::Write;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| SshCoreError::key_file(parent, err))?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|err| SshCoreError::key_file(path, err))?;
    file.write_all(contents).map_err(|err| SshCoreError::key_file(path, err))?;
    Ok(())
}
