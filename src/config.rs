//! Configuration management for the coordinator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use chrono::Duration;
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub coordinator: CoordinatorConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    pub wallet: WalletConfig,
    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub instance_id: String,
    /// Lifetime of an ACTIVE order when the intent does not carry one.
    pub default_order_duration_secs: u64,
    /// Dutch-auction decay window.
    pub fast_auction_duration_secs: u64,
    /// Deadline a resolver has to report escrows after committing.
    pub resolver_commitment_window_secs: u64,
    /// Pause between both-escrows-funded and secret publication.
    pub secret_reveal_delay_secs: u64,
    /// SecretBroadcast TTL before the authoritative fallback reveal.
    pub competition_window_secs: u64,
    /// Days COMPLETED/FAILED orders are kept before pruning.
    pub retention_days: u32,
    /// Cadence of the deadline scan.
    pub reaper_interval_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub chain_call_timeout_secs: u64,
    pub health_check_interval_secs: u64,
}

impl CoordinatorConfig {
    pub fn commitment_window(&self) -> Duration {
        Duration::seconds(self.resolver_commitment_window_secs as i64)
    }

    pub fn competition_window(&self) -> Duration {
        Duration::seconds(self.competition_window_secs as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    /// Escrow factory: spender of maker allowances, deployer of both HTLC
    /// escrows, and the EIP-712 verifying contract for this chain.
    pub escrow_factory: Address,
    /// Overrides the per-chain recommendation when set.
    pub confirmation_blocks: Option<u64>,
    /// Minimum native-currency safety deposit per escrow, in wei.
    pub min_safety_deposit_wei: U256,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub keystore_path: Option<String>,
    pub private_key_env: Option<String>,
}

/// Reference quotes for admission, 6-decimal price scale, keyed by
/// `"0x<src_token>:0x<dst_token>"` (lowercase). Stands in for the external
/// price feed; production deployments point this at their oracle sidecar.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    pub pairs: HashMap<String, u64>,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("LOCKSTEP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in &self.chains {
            if chain.enabled {
                if chain.rpc_urls.is_empty() {
                    anyhow::bail!("Chain {} has no RPC URLs configured", name);
                }
                if chain.escrow_factory == Address::zero() {
                    anyhow::bail!("Chain {} has no escrow factory configured", name);
                }
            }
        }

        if self.coordinator.fast_auction_duration_secs == 0 {
            anyhow::bail!("fast_auction_duration_secs must be positive");
        }
        if self.coordinator.resolver_commitment_window_secs == 0 {
            anyhow::bail!("resolver_commitment_window_secs must be positive");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }

    /// Confirmation depth for a chain: explicit config or the per-chain
    /// recommendation.
    pub fn confirmations_for(&self, chain_id: u64) -> u64 {
        self.get_chain_by_id(chain_id)
            .and_then(|c| c.confirmation_blocks)
            .unwrap_or_else(|| recommended_confirmations(chain_id))
    }
}

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 32,
        // Ethereum testnets
        11155111 | 5 => 12,
        // Polygon
        137 => 128,
        80001 | 80002 => 32,
        // Arbitrum
        42161 | 421614 => 64,
        // Optimism
        10 | 11155420 => 64,
        // Base
        8453 | 84532 => 64,
        // Avalanche (instant finality)
        43114 | 43113 => 1,
        // Default conservative
        _ => 64,
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn confirmation_override_beats_recommendation() {
        let toml_str = r#"
            [coordinator]
            instance_id = "test"
            default_order_duration_secs = 300
            fast_auction_duration_secs = 60
            resolver_commitment_window_secs = 300
            secret_reveal_delay_secs = 10
            competition_window_secs = 300
            retention_days = 30
            reaper_interval_secs = 10
            max_retries = 5
            retry_delay_ms = 1000
            chain_call_timeout_secs = 30
            health_check_interval_secs = 60

            [database]
            url = "postgres://localhost/lockstep"
            max_connections = 5
            min_connections = 1

            [api]
            host = "127.0.0.1"
            port = 8080

            [metrics]
            enabled = false
            port = 9090

            [wallet]
            private_key_env = "COORDINATOR_PRIVATE_KEY"

            [oracle]
            pairs = {}

            [chains.base_sepolia]
            chain_id = 84532
            name = "base-sepolia"
            rpc_urls = ["http://localhost:8545"]
            escrow_factory = "0x00000000000000000000000000000000000000fa"
            confirmation_blocks = 3
            min_safety_deposit_wei = "0x2386f26fc10000"
            enabled = true

            [chains.arbitrum_sepolia]
            chain_id = 421614
            name = "arbitrum-sepolia"
            rpc_urls = ["http://localhost:8546"]
            escrow_factory = "0x00000000000000000000000000000000000000fb"
            min_safety_deposit_wei = "0x2386f26fc10000"
            enabled = true
        "#;

        let settings: Settings = toml::from_str(toml_str).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.confirmations_for(84532), 3);
        assert_eq!(settings.confirmations_for(421614), 64);
        assert_eq!(settings.enabled_chains().len(), 2);
    }
}
