use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use secrecy::SecretString;
use tracing::level_filters::LevelFilter;
use tssh_types::{DeviceEntry, DirectoryFile, Endpoint, ProxySettings, parse_endpoint};

const DEFAULT_LISTEN: &str = "0.0.0.0:2222";
const DEFAULT_HOST_KEY: &str = "tssh_host_ed25519_key";

#[derive(Debug, Parser)]
#[command(
    name = "tssh",
    version,
    about = "SSH proxy that forwards each login to a destination device"
)]
struct RawArgs {
    /// Address to accept SSH connections on
    #[arg(long, env = "TSSH_LISTEN", value_name = "ADDR", default_value = DEFAULT_LISTEN)]
    listen: String,
    /// Server host key (OpenSSH format); generated when missing
    #[arg(long, env = "TSSH_HOST_KEY", value_name = "PATH", default_value = DEFAULT_HOST_KEY)]
    host_key: PathBuf,
    /// Private key used to authenticate to destinations
    #[arg(short = 'i', long, env = "TSSH_IDENTITY", value_name = "PATH")]
    identity: Option<PathBuf>,
    /// Passphrase for an encrypted identity key
    #[arg(long, env = "TSSH_IDENTITY_PASSPHRASE", value_name = "PASSPHRASE", hide_env_values = true)]
    identity_passphrase: Option<String>,
    /// Forward every login to this HOST[:PORT]
    #[arg(long, env = "TSSH_DESTINATION", value_name = "HOST[:PORT]", conflicts_with_all = ["devices", "device"])]
    destination: Option<String>,
    /// JSON device directory
    #[arg(long, env = "TSSH_DEVICES", value_name = "PATH")]
    devices: Option<PathBuf>,
    /// Add a device to the directory (repeatable)
    #[arg(long = "device", value_name = "NAME=HOST[:PORT]", action = ArgAction::Append)]
    device: Vec<String>,
    /// Device used when a login does not name one
    #[arg(long, env = "TSSH_DEFAULT_DEVICE", value_name = "NAME")]
    default_device: Option<String>,
    /// Close connections idle for this many seconds (0 disables)
    #[arg(long, env = "TSSH_IDLE_TIMEOUT", value_name = "SECS", default_value_t = 0)]
    idle_timeout: u64,
    /// Close connections after this many seconds regardless of activity (0 disables)
    #[arg(long, env = "TSSH_MAX_TIMEOUT", value_name = "SECS", default_value_t = 0)]
    max_timeout: u64,
    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "TSSH_LOG_LEVEL", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    /// Print the device directory and exit
    #[arg(long, action = ArgAction::SetTrue)]
    list_devices: bool,
}

/// Where authenticated logins are sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Routing {
    Static(Endpoint),
    Directory(DirectoryFile),
}

pub struct ProxyConfig {
    pub settings: ProxySettings,
    pub host_key: PathBuf,
    pub identity: Option<PathBuf>,
    pub identity_passphrase: Option<SecretString>,
    pub routing: Routing,
    pub log_level: LevelFilter,
    pub list_devices: bool,
}

impl ProxyConfig {
    pub fn parse() -> Result<Self> {
        Self::try_from(RawArgs::parse())
    }
}

impl TryFrom<RawArgs> for ProxyConfig {
    type Error = anyhow::Error;

    fn try_from(args: RawArgs) -> Result<Self> {
        let log_level = ssh_core::logging::parse_level(&args.log_level)?;
        let routing = routing(&args)?;

        if !args.list_devices && args.identity.is_none() {
            bail!("missing --identity: a private key is needed to log in to destinations");
        }

        let default_device = match &routing {
            Routing::Directory(file) => file.default.clone(),
            Routing::Static(_) => None,
        };
        let settings = ProxySettings {
            listen: args.listen,
            version: env!("CARGO_PKG_VERSION").to_string(),
            idle_timeout: seconds(args.idle_timeout),
            max_session: seconds(args.max_timeout),
            default_device,
            ..Default::default()
        };

        Ok(ProxyConfig {
            settings,
            host_key: args.host_key,
            identity: args.identity,
            identity_passphrase: args.identity_passphrase.map(SecretString::from),
            routing,
            log_level,
            list_devices: args.list_devices,
        })
    }
}

fn routing(args: &RawArgs) -> Result<Routing> {
    if let Some(destination) = &args.destination {
        let endpoint = parse_endpoint(destination).with_context(|| format!("invalid --destination {destination}"))?;
        return Ok(Routing::Static(endpoint));
    }

    let mut file = match &args.devices {
        Some(path) => DirectoryFile::load(path).with_context(|| format!("failed to load device directory {}", path.display()))?,
        None => DirectoryFile::default(),
    };
    for spec in &args.device {
        file.devices.push(DeviceEntry::from_spec(spec)?);
    }
    if args.default_device.is_some() {
        file.default = args.default_device.clone();
    }
    if file.devices.is_empty() {
        bail!("no destination configured; use --destination, --devices or --device");
    }
    file.validate()?;
    Ok(Routing::Directory(file))
}

fn seconds(secs: u64) -> Option<std::time::Duration> {
    (secs > 0).then(|| std::time::Duration::from_secs(secs))
}
