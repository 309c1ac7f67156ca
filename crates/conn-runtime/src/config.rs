//! Runtime configuration: a TOML file plus `CC_*` environment overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bitcoin::Network;
use chain_conn::BackendConfig;
use serde::Deserialize;
use tracing::{info, warn};

/// Everything the runtime needs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Backend connection settings.
    pub backend: BackendConfig,

    /// PEM file read into `backend.certificates`.
    pub rpc_cert_file: Option<PathBuf>,

    /// Addresses the runtime's client watches.
    pub watch_addresses: Vec<String>,

    /// Log every connected block, not only filtered ones.
    pub notify_blocks: bool,

    /// Log every mempool transaction, not only watched ones.
    pub notify_all_mempool: bool,
}

/// Load configuration.
///
/// 1. `CC_CONFIG_FILE` (TOML), if set
/// 2. Environment overrides:
///    `CC_NETWORK`, `CC_RPC_HOST`, `CC_RPC_USER`, `CC_RPC_PASS`,
///    `CC_DISABLE_TLS`, `CC_RPC_CERT_FILE`, `CC_RPC_POLLING`,
///    `CC_POLL_BLOCK_MS`, `CC_POLL_TX_MS`, `CC_WATCH_ADDRESSES`
///    (comma-separated), `CC_NOTIFY_BLOCKS`
pub fn load_config() -> Result<RuntimeConfig> {
    let mut config = match std::env::var("CC_CONFIG_FILE") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            from_file(Path::new(&path))?
        }
        Err(_) => RuntimeConfig::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok())?;

    if let Some(path) = &config.rpc_cert_file {
        let pem = std::fs::read(path)
            .with_context(|| format!("reading certificate {}", path.display()))?;
        config.backend.certificates = Some(pem);
    }

    config.backend.validate()?;
    Ok(config)
}

/// Parse a TOML configuration file.
pub fn from_file(path: &Path) -> Result<RuntimeConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

/// Apply `CC_*` overrides looked up through `lookup`.
pub fn apply_overrides(
    config: &mut RuntimeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(network) = lookup("CC_NETWORK") {
        config.backend.network = network
            .parse::<Network>()
            .with_context(|| format!("CC_NETWORK={}", network))?;
    }
    if let Some(host) = lookup("CC_RPC_HOST") {
        config.backend.host = host;
    }
    if let Some(user) = lookup("CC_RPC_USER") {
        config.backend.user = user;
    }
    if let Some(pass) = lookup("CC_RPC_PASS") {
        config.backend.pass = pass;
    }
    if let Some(flag) = lookup("CC_DISABLE_TLS") {
        config.backend.disable_tls = parse_bool("CC_DISABLE_TLS", &flag)?;
    }
    if let Some(flag) = lookup("CC_RPC_POLLING") {
        config.backend.rpc_polling = parse_bool("CC_RPC_POLLING", &flag)?;
    }
    if let Some(path) = lookup("CC_RPC_CERT_FILE") {
        config.rpc_cert_file = Some(PathBuf::from(path));
    }
    if let Some(ms) = lookup("CC_POLL_BLOCK_MS") {
        config.backend.poll_block_interval_ms =
            ms.parse().with_context(|| format!("CC_POLL_BLOCK_MS={}", ms))?;
    }
    if let Some(ms) = lookup("CC_POLL_TX_MS") {
        config.backend.poll_tx_interval_ms =
            ms.parse().with_context(|| format!("CC_POLL_TX_MS={}", ms))?;
    }
    if let Some(list) = lookup("CC_WATCH_ADDRESSES") {
        config.watch_addresses = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(flag) = lookup("CC_NOTIFY_BLOCKS") {
        config.notify_blocks = parse_bool("CC_NOTIFY_BLOCKS", &flag)?;
    }

    if !config.backend.disable_tls && config.backend.certificates.is_none() && config.rpc_cert_file.is_none() {
        warn!("TLS enabled without a certificate; relying on system roots");
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => anyhow::bail!("{}: expected a boolean, got {:?}", key, other),
    }
}
