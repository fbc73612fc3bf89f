use std::{borrow::Cow, sync::Arc, time::Duration};

use russh::{Preferred, client};

/// Algorithm preferences for both the inbound server and outbound clients.
///
/// Compression is only offered after `none` so interactive sessions are not slowed down.
pub fn default_preferred() -> Preferred {
    Preferred {
        compression: Cow::Owned(vec![russh::compression::NONE, russh::compression::ZLIB, russh::compression::ZLIB_LEGACY]),
        ..Preferred::DEFAULT.clone()
    }
}

/// Client configuration for outbound connections.
///
/// `client_id` is the identification line announced to the destination; when absent russh's own is used.
pub fn client_config(client_id: Option<&str>) -> Arc<client::Config> {
    let mut cfg = client::Config {
        preferred: default_preferred(),
        nodelay: true,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    };
    if let Some(id) = client_id.map(str::trim).filter(|id| id.starts_with("SSH-2.0-")) {
        cfg.client_id = russh::SshId::Standard(id.to_string().into());
    }
    Arc::new(cfg)
}
