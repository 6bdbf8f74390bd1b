//! Facilitator server configuration.
//!
//! Settings come from a JSON file whose string values may reference the
//! environment as `$VAR` or `${VAR}`. Command-line flags (or their
//! environment variables) pick the file and override the bind address.
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "host": "0.0.0.0",
//!   "port": 4021,
//!   "chains": {
//!     "base-sepolia": {
//!       "rpc": [{ "url": "https://sepolia.base.org", "rate_limit": 25 }],
//!       "signer_private_key": "$SIGNER_KEY_BASE_SEPOLIA"
//!     },
//!     "solana-devnet": {
//!       "rpc": [{ "url": "https://api.devnet.solana.com" }],
//!       "signer_private_key": "${SOLANA_FEE_PAYER}"
//!     }
//!   },
//!   "receipts": { "attempts": 30, "delay_ms": 2000 }
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: path to the configuration file (default: `config.json`)
//! - `HOST`, `PORT`: override the bind address
//! - any variable referenced from the file, typically signer keys

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use url::Url;
use x402_core::assets::{AssetInfo, AssetRegistry};
use x402_core::chain::ChainId;
use x402_core::networks::NetworkRegistry;
use x402_core::types::PaymentRequirement;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "x402-facilitator")]
#[command(about = "x402 facilitator HTTP server")]
pub struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Bind address, overriding the file
    #[arg(long, env = "HOST")]
    pub host: Option<IpAddr>,

    /// Port, overriding the file
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
}

/// Configuration load failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    /// The file is not valid configuration JSON.
    #[error("failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Top-level facilitator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FacilitatorConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Chains to serve, keyed by network name or CAIP-2 id.
    #[serde(default)]
    pub chains: BTreeMap<String, ChainConfig>,

    /// Networks beyond the built-in tables.
    #[serde(default)]
    pub networks: Vec<CustomNetwork>,

    /// Extra network names, alias to name or CAIP-2 id.
    #[serde(default)]
    pub network_aliases: HashMap<String, String>,

    /// Tokens beyond the built-in USDC deployments.
    #[serde(default)]
    pub assets: Vec<AssetInfo>,

    /// Short names for asset addresses.
    #[serde(default)]
    pub asset_aliases: Vec<AssetAlias>,

    /// Receipt polling for EVM settlements.
    #[serde(default)]
    pub receipts: ReceiptConfig,

    /// Requirements listed by `GET /discovery/resources`. Entries must name a
    /// resource and set `discoverable`.
    #[serde(default)]
    pub resources: Vec<PaymentRequirement>,
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            chains: BTreeMap::new(),
            networks: Vec::new(),
            network_aliases: HashMap::new(),
            assets: Vec::new(),
            asset_aliases: Vec::new(),
            receipts: ReceiptConfig::default(),
            resources: Vec::new(),
        }
    }
}

/// One served chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// RPC endpoints, tried in order. Solana uses the first.
    pub rpc: Vec<RpcEndpoint>,

    /// EVM: hex private key. Solana: base58 keypair.
    pub signer_private_key: SecretKey,

    /// EIP-3009 entry point used for settlement. Defaults to
    /// `transferWithAuthorization`; `receiveWithAuthorization` only settles
    /// payments to this chain's signer.
    #[cfg(feature = "chain-eip155")]
    #[serde(default)]
    pub settlement_method: x402_evm::exact::SettlementMethod,
}

/// One RPC endpoint of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcEndpoint {
    /// HTTP JSON-RPC endpoint.
    pub url: Url,
    /// Requests per second.
    #[serde(default)]
    pub rate_limit: Option<u32>,
}

/// A network added to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomNetwork {
    /// Version 1 name, e.g. `my-chain`.
    pub name: String,
    /// CAIP-2 id.
    pub chain_id: ChainId,
}

/// A short name for a registered asset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetAlias {
    /// Network the asset lives on.
    pub network: String,
    /// Name accepted in place of the address.
    pub alias: String,
    /// Asset address or mint.
    pub address: String,
}

/// Confirmation polling after an EVM settlement is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ReceiptConfig {
    /// Polls before giving up.
    #[serde(default = "default_receipt_attempts")]
    pub attempts: u32,
    /// Pause between polls, in milliseconds.
    #[serde(default = "default_receipt_delay_ms")]
    pub delay_ms: u64,
}

impl ReceiptConfig {
    /// Pause between polls.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            attempts: default_receipt_attempts(),
            delay_ms: default_receipt_delay_ms(),
        }
    }
}

/// A private key read from configuration. Never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    /// The key text, trimmed.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.trim()
    }

    /// Empty, or still an unexpanded `$VAR` reference.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        let key = self.expose();
        key.is_empty() || key.starts_with('$')
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    4021
}

const fn default_receipt_attempts() -> u32 {
    30
}

const fn default_receipt_delay_ms() -> u64 {
    2000
}

impl FacilitatorConfig {
    /// Loads the file named on the command line, then applies the host and
    /// port overrides.
    ///
    /// # Errors
    ///
    /// The file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let args = CliArgs::parse();
        let mut config = Self::load_from(&args.config)?;
        if let Some(host) = args.host {
            config.host = host;
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        Ok(config)
    }

    /// Loads a configuration file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// The file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_owned(), e))?;
        Self::from_json(&content)
    }

    /// Parses a configuration document, expanding environment references in
    /// every string value.
    ///
    /// # Errors
    ///
    /// Invalid JSON, or a document that does not match the schema.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let mut value: serde_json::Value = serde_json::from_str(content)?;
        expand_values(&mut value, &|name| std::env::var(name).ok());
        Ok(serde_json::from_value(value)?)
    }

    /// Registers the custom networks and aliases.
    pub fn apply_networks(&self, networks: &NetworkRegistry) {
        for network in &self.networks {
            networks.register_network(&network.name, network.chain_id.clone());
        }
        for (alias, target) in &self.network_aliases {
            if !networks.register_alias(alias, target) {
                tracing::warn!(alias = %alias, target = %target, "network alias target is unknown");
            }
        }
    }

    /// Registers the custom assets and their aliases.
    pub fn apply_assets(&self, assets: &AssetRegistry) {
        for asset in &self.assets {
            assets.register(asset.clone());
        }
        for alias in &self.asset_aliases {
            if !assets.register_alias(&alias.network, &alias.alias, &alias.address) {
                tracing::warn!(
                    network = %alias.network,
                    alias = %alias.alias,
                    "asset alias target is unknown"
                );
            }
        }
    }
}

fn expand_values(value: &mut serde_json::Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains('$') {
                *s = expand_env_vars(s, lookup);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                expand_values(item, lookup);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                expand_values(item, lookup);
            }
        }
        _ => {}
    }
}

/// Expands `$VAR` and `${VAR}` through `lookup`. Unresolved references are
/// left as written.
fn expand_env_vars(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced {
                chars.next();
                if c == '}' {
                    closed = true;
                    break;
                }
            } else if c.is_ascii_alphanumeric() || c == '_' {
                chars.next();
            } else {
                break;
            }
            name.push(c);
        }

        match lookup(&name).filter(|_| !name.is_empty() && (closed || !braced)) {
            Some(value) => result.push_str(&value),
            None => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "KEY" => Some("0xabc".into()),
            "RPC_HOST" => Some("rpc.example".into()),
            _ => None,
        }
    }

    #[test]
    fn expands_both_reference_forms() {
        assert_eq!(expand_env_vars("$KEY", &lookup), "0xabc");
        assert_eq!(expand_env_vars("https://${RPC_HOST}/v1", &lookup), "https://rpc.example/v1");
        assert_eq!(expand_env_vars("$RPC_HOST-x", &lookup), "rpc.example-x");
    }

    #[test]
    fn leaves_unresolved_references_alone() {
        assert_eq!(expand_env_vars("$MISSING", &lookup), "$MISSING");
        assert_eq!(expand_env_vars("${MISSING}", &lookup), "${MISSING}");
        assert_eq!(expand_env_vars("${KEY", &lookup), "${KEY");
        assert_eq!(expand_env_vars("cost: $", &lookup), "cost: $");
    }

    #[test]
    fn expands_nested_string_values_only() {
        let mut value = serde_json::json!({
            "port": 4021,
            "chains": { "base": { "signer_private_key": "$KEY", "rpc": [{ "url": "https://${RPC_HOST}" }] } }
        });
        expand_values(&mut value, &lookup);
        assert_eq!(value["port"], 4021);
        assert_eq!(value["chains"]["base"]["signer_private_key"], "0xabc");
        assert_eq!(value["chains"]["base"]["rpc"][0]["url"], "https://rpc.example");
    }

    #[test]
    fn parses_a_full_document() {
        let config = FacilitatorConfig::from_json(
            r#"{
                "port": 8080,
                "chains": {
                    "base-sepolia": {
                        "rpc": [{ "url": "https://sepolia.base.org", "rate_limit": 10 }],
                        "signer_private_key": "0x01"
                    }
                },
                "networks": [{ "name": "devchain", "chain_id": "eip155:31337" }],
                "network_aliases": { "base-testnet": "base-sepolia" },
                "receipts": { "attempts": 5 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.host, default_host());
        assert_eq!(config.port, 8080);
        let chain = &config.chains["base-sepolia"];
        assert_eq!(chain.rpc[0].rate_limit, Some(10));
        assert_eq!(config.networks[0].chain_id, ChainId::eip155(31337));
        assert_eq!(config.receipts.attempts, 5);
        assert_eq!(config.receipts.delay(), Duration::from_secs(2));
    }

    #[test]
    fn secret_keys_are_not_printed() {
        let config = FacilitatorConfig::from_json(
            r#"{ "chains": { "base": { "rpc": [], "signer_private_key": "0xdeadbeef" } } }"#,
        )
        .unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("deadbeef"));
        assert_eq!(config.chains["base"].signer_private_key.expose(), "0xdeadbeef");
    }

    #[test]
    fn unresolved_keys_are_detected() {
        let key: SecretKey = serde_json::from_str("\"$NOT_SET\"").unwrap();
        assert!(key.is_unresolved());
        let key: SecretKey = serde_json::from_str("\"  \"").unwrap();
        assert!(key.is_unresolved());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = FacilitatorConfig::load_from(Path::new("/nonexistent/x402.json")).unwrap();
        assert_eq!(config.port, 4021);
        assert!(config.chains.is_empty());
    }
}
