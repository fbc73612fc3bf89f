//! Host key policy for outbound connections.

use russh::{client, keys};
use tracing::{debug, warn};

/// Accepts any destination key unless one is pinned, in which case it must match exactly.
pub struct DestinationKeyCheck {
    pub expected_key: Option<String>,
    pub destination: String,
}

impl DestinationKeyCheck {
    pub fn new(destination: impl Into<String>, expected_key: Option<String>) -> Self {
        Self {
            expected_key,
            destination: destination.into(),
        }
    }

    /// Compare an OpenSSH-encoded key with the pin. Only the algorithm and key blob are compared.
    pub fn matches(&self, presented: &str) -> bool {
        match &self.expected_key {
            Some(expected) => key_body(expected) == key_body(presented),
            None => true,
        }
    }
}

fn key_body(openssh: &str) -> (&str, &str) {
    let mut parts = openssh.split_whitespace();
    (parts.next().unwrap_or_default(), parts.next().unwrap_or_default())
}

impl client::Handler for DestinationKeyCheck {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let key_str_res = server_public_key.to_openssh();
        let verdict = match key_str_res {
            Ok(key_str) if self.matches(&key_str) => {
                if self.expected_key.is_none() {
                    debug!(destination = %self.destination, key = %key_str, "accepting unpinned destination host key");
                }
                true
            }
            Ok(key_str) => {
                warn!(
                    destination = %self.destination,
                    expected = self.expected_key.as_deref().unwrap_or_default(),
                    presented = %key_str,
                    "HOST KEY MISMATCH"
                );
                false
            }
            Err(_) => false,
        };
        async move { Ok(verdict) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpinned_accepts_anything() {
        assert!(DestinationKeyCheck::new("box:22", None).matches("ssh-ed25519 AAAA"));
    }

    #[test]
    fn pinned_ignores_comment() {
        let check = DestinationKeyCheck::new("box:22", Some("ssh-ed25519 AAAAkey root@box".into()));
        assert!(check.matches("ssh-ed25519 AAAAkey"));
        assert!(!check.matches("ssh-ed25519 AAAAother"));
        assert!(!check.matches("ssh-rsa AAAAkey"));
    }
}
