//! russh implementation of the outbound leg.

use std::sync::Arc;

use async_trait::async_trait;
use russh::{
    Disconnect, client, keys::{PrivateKeyWithHashAlg, ssh_key::Algorithm}
};
use tracing::info;

use super::{DialTarget, Dialer, DestinationKeyCheck, OutboundSession};
use crate::{
    channel::{
        ChannelEnd, ChannelKind, driver
    }, error::{ProxyError, ProxyResult}, signer::SignerProvider
};

/// Dials destinations with public key authentication using keys from a [`SignerProvider`].
pub struct SshDialer {
    signer: Arc<dyn SignerProvider>,
}

impl SshDialer {
    pub fn new(signer: Arc<dyn SignerProvider>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(&self, target: &DialTarget) -> ProxyResult<Arc<dyn OutboundSession>> {
        let address = target.destination.address();
        let config = ssh_core::crypto::client_config(target.client_ident.as_deref());
        let check = DestinationKeyCheck::new(address.clone(), target.destination.host_key.clone());

        info!(destination = %target.destination, user = %target.user, "connecting to destination");
        let mut handle = client::connect(config, address.as_str(), check)
            .await
            .map_err(|source| ProxyError::Dial {
                destination: address.clone(),
                source,
            })?;

        let key = self.signer.signer(&target.user).await?;
        let hash_alg = if matches!(key.algorithm(), Algorithm::Rsa { .. }) {
            handle.best_supported_rsa_hash().await.unwrap_or(None).flatten()
        } else {
            None
        };

        let result = handle
            .authenticate_publickey(target.user.clone(), PrivateKeyWithHashAlg::new(key, hash_alg))
            .await
            .map_err(|source| ProxyError::Dial {
                destination: address.clone(),
                source,
            })?;
        if !result.success() {
            let _ = handle.disconnect(Disconnect::ByApplication, "", "").await;
            return Err(ProxyError::OutboundAuthRejected {
                destination: address,
                user: target.user.clone(),
            });
        }

        info!(destination = %target.destination, user = %target.user, "outbound client authenticated");
        Ok(Arc::new(SshOutbound { handle, address }))
    }
}

/// Authenticated russh client connection.
pub struct SshOutbound {
    handle: client::Handle<DestinationKeyCheck>,
    address: String,
}

#[async_trait]
impl OutboundSession for SshOutbound {
    fn destination(&self) -> &str {
        &self.address
    }

    async fn open_channel(&self, kind: &ChannelKind) -> ProxyResult<ChannelEnd> {
        let channel = match kind {
            ChannelKind::Session => self.handle.channel_open_session().await,
            ChannelKind::DirectTcpip {
                host_to_connect,
                port_to_connect,
                originator_address,
                originator_port,
            } => {
                self.handle
                    .channel_open_direct_tcpip(host_to_connect.as_str(), *port_to_connect, originator_address.as_str(), *originator_port)
                    .await
            }
            ChannelKind::Other(name) => return Err(ProxyError::UnsupportedChannel(name.clone())),
        }
        .map_err(|err| ProxyError::open_channel(kind.name(), err))?;

        Ok(driver::spawn_outbound(channel))
    }

    async fn close(&self) -> ProxyResult<()> {
        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "")
            .await
            .map_err(|err| ProxyError::close(format!("outbound client to {}", self.address), err))
    }
}
