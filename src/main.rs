mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use proxy_core::{Destination, DestinationResolver, DeviceDirectory, IdentityFile, ProxyServer, SshDialer, StaticResolver};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::{ProxyConfig, Routing};

#[tokio::main]
async fn main() -> Result<()> {
    ssh_core::logging::init_tracing();

    let config = ProxyConfig::parse()?;
    ssh_core::logging::set_level(config.log_level);

    if config.list_devices {
        return list_devices(&config.routing);
    }

    run_proxy(config).await
}

async fn run_proxy(config: ProxyConfig) -> Result<()> {
    let host_key = ssh_core::keys::load_or_create_host_key(&config.host_key)
        .with_context(|| format!("failed to load host key {}", config.host_key.display()))?;
    let identity = config.identity.context("missing --identity")?;

    let resolver: Arc<dyn DestinationResolver> = match config.routing {
        Routing::Static(endpoint) => Arc::new(StaticResolver::new(Destination::new(endpoint))),
        Routing::Directory(file) => Arc::new(DeviceDirectory::from(file)),
    };
    let dialer = Arc::new(SshDialer::new(Arc::new(IdentityFile::new(identity, config.identity_passphrase))));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = ProxyServer::new(config.settings, host_key, resolver, dialer, shutdown_rx);

    if let Some(mut errors) = server.errors() {
        tokio::spawn(async move {
            while let Some(err) = errors.recv().await {
                error!(error = %err, "proxy error");
            }
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for ctrl-c; run until killed");
                shutdown_tx.closed().await;
            }
        }
    });

    server.start().await?;
    info!("proxy stopped");
    Ok(())
}

fn list_devices(routing: &Routing) -> Result<()> {
    match routing {
        Routing::Static(endpoint) => println!("all logins -> {endpoint}"),
        Routing::Directory(file) => {
            let directory = DeviceDirectory::from(file.clone());
            for device in directory.devices() {
                let marker = if directory.default_device() == Some(device.name.as_str()) { '*' } else { ' ' };
                println!("{marker} {}", serde_json::to_string(device)?);
            }
        }
    }
    Ok(())
}
