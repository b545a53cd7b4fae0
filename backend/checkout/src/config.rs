//! Application configuration loaded from environment variables.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{CheckoutError, Result};
use crate::orchestrator::OrchestratorConfig;
use crate::types::{Network, WalletKind};

#[derive(Debug, Clone)]
pub struct Config {
    /// Soroban RPC endpoint used for submission and confirmation
    pub rpc_url: String,
    /// Horizon endpoint used for account balances
    pub horizon_url: String,
    /// Base URL of the transaction build service
    pub builder_url: String,
    /// Bridge endpoint per wallet kind (`WALLET_BRIDGES=freighter=http://..,albedo=http://..`)
    pub wallet_bridges: HashMap<WalletKind, String>,
    /// Network wallets bind to on connect
    pub network: Network,
    pub supported_networks: HashSet<Network>,
    /// JSON file with the purchasable projects
    pub catalog_path: String,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Asset the purchase is paid in, shown on the preview
    pub payment_asset: String,
    /// Account receiving payments
    pub recipient_address: String,
    pub submit_timeout_secs: u64,
    pub confirmation_timeout_secs: u64,
    pub confirmation_poll_interval_ms: u64,
    /// User-triggered retries allowed per attempt
    pub max_retries: u32,
    /// Timeout applied to every outbound HTTP request
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let network: Network = parse_or("NETWORK", "testnet")?;
        let supported_networks = match env_var("SUPPORTED_NETWORKS") {
            Ok(raw) => parse_networks(&raw)?,
            Err(_) => HashSet::from([Network::Testnet, Network::Mainnet]),
        };
        if !supported_networks.contains(&network) {
            return Err(CheckoutError::Config(format!(
                "NETWORK {network} is not listed in SUPPORTED_NETWORKS"
            )));
        }

        Ok(Config {
            rpc_url: env_var("RPC_URL")
                .unwrap_or_else(|_| "https://soroban-testnet.stellar.org".to_string()),
            horizon_url: env_var("HORIZON_URL")
                .unwrap_or_else(|_| "https://horizon-testnet.stellar.org".to_string()),
            builder_url: env_var("BUILDER_URL")
                .unwrap_or_else(|_| "http://localhost:3002".to_string()),
            wallet_bridges: parse_bridges(&env_var("WALLET_BRIDGES").unwrap_or_default())?,
            network,
            supported_networks,
            catalog_path: env_var("CATALOG_PATH").unwrap_or_else(|_| "./catalog.json".to_string()),
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./checkout.db".to_string()),
            api_port: parse_or("API_PORT", "3001")?,
            payment_asset: env_var("PAYMENT_ASSET").unwrap_or_else(|_| "USDC".to_string()),
            recipient_address: env_var("RECIPIENT_ADDRESS").map_err(|_| {
                CheckoutError::Config(
                    "RECIPIENT_ADDRESS environment variable is required".to_string(),
                )
            })?,
            submit_timeout_secs: parse_or("SUBMIT_TIMEOUT_SECS", "30")?,
            confirmation_timeout_secs: parse_or("CONFIRMATION_TIMEOUT_SECS", "60")?,
            confirmation_poll_interval_ms: parse_or("CONFIRMATION_POLL_INTERVAL_MS", "2000")?,
            max_retries: parse_or("MAX_RETRIES", "3")?,
            http_timeout_secs: parse_or("HTTP_TIMEOUT_SECS", "30")?,
        })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            submit_timeout: Duration::from_secs(self.submit_timeout_secs),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            confirmation_poll_interval: Duration::from_millis(self.confirmation_poll_interval_ms),
            max_retries: self.max_retries,
        }
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| CheckoutError::Config(format!("Missing env var: {key}")))
}

fn parse_or<T: FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| CheckoutError::Config(format!("Invalid {key}")))
}

fn parse_networks(raw: &str) -> Result<HashSet<Network>> {
    let networks = raw
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<Network>().map_err(CheckoutError::Config))
        .collect::<Result<HashSet<_>>>()?;
    if networks.is_empty() {
        return Err(CheckoutError::Config(
            "SUPPORTED_NETWORKS must name at least one network".to_string(),
        ));
    }
    Ok(networks)
}

/// Parse `kind=url` pairs separated by commas.
fn parse_bridges(raw: &str) -> Result<HashMap<WalletKind, String>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|pair| {
            let (kind, url) = pair.split_once('=').ok_or_else(|| {
                CheckoutError::Config(format!("Invalid WALLET_BRIDGES entry '{pair}'"))
            })?;
            let kind = kind.parse::<WalletKind>().map_err(CheckoutError::Config)?;
            Ok((kind, url.trim().to_string()))
        })
        .collect()
}
