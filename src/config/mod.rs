//! Runtime configuration
//!
//! Environment contract for the runtime. Parsing is strict: anything the
//! operator sets must validate, and failures carry a diagnostic naming the
//! offending variable. The mainnet guard lives here so both startup and
//! wallet construction reject `mainnet-beta` hosts through the same check.

pub mod agents;

pub use agents::{load_agent_configs, AgentConfig, StrategyKind};

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default devnet RPC endpoint.
pub const DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";

/// Environment variable names.
pub mod env_vars {
    pub const SOLANA_RPC_URL: &str = "SOLANA_RPC_URL";
    pub const SOLANA_NETWORK: &str = "SOLANA_NETWORK";
    pub const WALLET_PASSWORD: &str = "WALLET_PASSWORD";
    pub const WALLET_SECRET_KEY: &str = "WALLET_SECRET_KEY";
    pub const MAX_PER_TX_SOL: &str = "MAX_PER_TX_SOL";
    pub const MAX_SESSION_SOL: &str = "MAX_SESSION_SOL";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const AUDIT_DB_PATH: &str = "AUDIT_DB_PATH";
    pub const AGENTS_CONFIG_PATH: &str = "AGENTS_CONFIG_PATH";
    pub const AGENT_INTERVAL_MS: &str = "AGENT_INTERVAL_MS";
    pub const NODE_ENV: &str = "NODE_ENV";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEnv {
    Development,
    Test,
    Production,
}

impl NodeEnv {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "development" => Ok(NodeEnv::Development),
            "test" => Ok(NodeEnv::Test),
            "production" => Ok(NodeEnv::Production),
            other => Err(Error::InvalidConfig(format!(
                "NODE_ENV must be development, test, or production; got `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolanaNetwork {
    Devnet,
    Testnet,
}

impl SolanaNetwork {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "devnet" => Ok(SolanaNetwork::Devnet),
            "testnet" => Ok(SolanaNetwork::Testnet),
            other => Err(Error::InvalidConfig(format!(
                "SOLANA_NETWORK must be devnet or testnet; got `{other}`"
            ))),
        }
    }
}

/// Validated environment snapshot.
#[derive(Clone)]
pub struct EnvConfig {
    pub node_env: NodeEnv,
    pub rpc_url: String,
    pub network: SolanaNetwork,
    pub wallet_password: Option<String>,
    pub max_per_tx_sol: Option<f64>,
    pub max_session_sol: Option<f64>,
    pub log_level: String,
    pub audit_db_path: PathBuf,
    pub agents_config_path: Option<PathBuf>,
    pub agent_interval_ms: u64,
}

// Manual Debug so a dumped config never prints the passphrase.
impl std::fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvConfig")
            .field("node_env", &self.node_env)
            .field("rpc_url", &self.rpc_url)
            .field("network", &self.network)
            .field(
                "wallet_password",
                &self.wallet_password.as_ref().map(|_| "[redacted]"),
            )
            .field("max_per_tx_sol", &self.max_per_tx_sol)
            .field("max_session_sol", &self.max_session_sol)
            .field("log_level", &self.log_level)
            .field("audit_db_path", &self.audit_db_path)
            .field("agents_config_path", &self.agents_config_path)
            .field("agent_interval_ms", &self.agent_interval_ms)
            .finish()
    }
}

impl EnvConfig {
    /// Read and validate the process environment. `.env` files are honored
    /// when present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        let node_env = match get(env_vars::NODE_ENV) {
            Some(value) => NodeEnv::parse(value)?,
            None => NodeEnv::Development,
        };

        if node_env == NodeEnv::Production {
            if let Some(name) = vars
                .keys()
                .find(|name| name.as_str().starts_with(env_vars::WALLET_SECRET_KEY))
            {
                return Err(Error::InvalidConfig(format!(
                    "{name} must not be set when NODE_ENV=production; use an encrypted keystore"
                )));
            }
        }

        let rpc_url = get(env_vars::SOLANA_RPC_URL)
            .unwrap_or(DEVNET_RPC_URL)
            .to_string();
        ensure_not_mainnet(&rpc_url)?;

        let network = match get(env_vars::SOLANA_NETWORK) {
            Some(value) => SolanaNetwork::parse(value)?,
            None => SolanaNetwork::Devnet,
        };

        let wallet_password = get(env_vars::WALLET_PASSWORD).map(str::to_string);
        if let Some(password) = &wallet_password {
            if password.chars().count() < 8 {
                return Err(Error::InvalidConfig(
                    "WALLET_PASSWORD must be at least 8 characters".into(),
                ));
            }
        }

        let max_per_tx_sol = parse_positive_f64(get(env_vars::MAX_PER_TX_SOL), env_vars::MAX_PER_TX_SOL)?;
        let max_session_sol =
            parse_positive_f64(get(env_vars::MAX_SESSION_SOL), env_vars::MAX_SESSION_SOL)?;
        if let (Some(per_tx), Some(session)) = (max_per_tx_sol, max_session_sol) {
            if per_tx > session {
                return Err(Error::InvalidConfig(format!(
                    "MAX_PER_TX_SOL ({per_tx}) must not exceed MAX_SESSION_SOL ({session})"
                )));
            }
        }

        let agent_interval_ms = match get(env_vars::AGENT_INTERVAL_MS) {
            Some(value) => {
                let parsed: u64 = value.parse().map_err(|_| {
                    Error::InvalidConfig(format!(
                        "AGENT_INTERVAL_MS must be a positive integer; got `{value}`"
                    ))
                })?;
                if parsed == 0 {
                    return Err(Error::InvalidConfig("AGENT_INTERVAL_MS must be > 0".into()));
                }
                parsed
            }
            None => 60_000,
        };

        Ok(Self {
            node_env,
            rpc_url,
            network,
            wallet_password,
            max_per_tx_sol,
            max_session_sol,
            log_level: get(env_vars::LOG_LEVEL).unwrap_or("info").to_string(),
            audit_db_path: get(env_vars::AUDIT_DB_PATH).unwrap_or("audit.db").into(),
            agents_config_path: get(env_vars::AGENTS_CONFIG_PATH).map(PathBuf::from),
            agent_interval_ms,
        })
    }
}

fn parse_positive_f64(value: Option<&str>, name: &str) -> Result<Option<f64>> {
    match value {
        None => Ok(None),
        Some(raw) => {
            let parsed: f64 = raw.parse().map_err(|_| {
                Error::InvalidConfig(format!("{name} must be a number; got `{raw}`"))
            })?;
            if !parsed.is_finite() || parsed <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a positive number; got `{raw}`"
                )));
            }
            Ok(Some(parsed))
        }
    }
}

/// Reject any RPC endpoint whose host names the main network. Called at
/// startup and again from wallet construction.
pub fn ensure_not_mainnet(rpc_url: &str) -> Result<()> {
    let parsed = Url::parse(rpc_url)
        .map_err(|e| Error::InvalidConfig(format!("invalid RPC URL `{rpc_url}`: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidConfig(format!("RPC URL `{rpc_url}` has no host")))?;
    if host.contains("mainnet-beta") {
        return Err(Error::MainnetBlocked(format!(
            "RPC host `{host}` targets mainnet; this runtime only operates on devnet/testnet"
        )));
    }
    Ok(())
}

/// Name of the per-agent secret override variable. Dashes in agent ids map
/// to underscores so the name stays a valid environment identifier.
pub fn agent_secret_env_var(agent_id: &str) -> String {
    format!(
        "{}_{}",
        env_vars::WALLET_SECRET_KEY,
        agent_id.to_uppercase().replace('-', "_")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_devnet() {
        let config = EnvConfig::from_vars(&vars(&[])).unwrap();
        assert_eq!(config.node_env, NodeEnv::Development);
        assert_eq!(config.rpc_url, DEVNET_RPC_URL);
        assert_eq!(config.network, SolanaNetwork::Devnet);
        assert_eq!(config.agent_interval_ms, 60_000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn mainnet_rpc_is_rejected() {
        let config = EnvConfig::from_vars(&vars(&[(
            env_vars::SOLANA_RPC_URL,
            "https://api.mainnet-beta.solana.com",
        )]));
        assert_eq!(config.unwrap_err().code(), "MAINNET_BLOCKED");
    }

    #[test]
    fn production_with_raw_secret_is_rejected() {
        let config = EnvConfig::from_vars(&vars(&[
            (env_vars::NODE_ENV, "production"),
            (env_vars::WALLET_SECRET_KEY, "whatever"),
        ]));
        assert_eq!(config.unwrap_err().code(), "INVALID_CONFIG");

        // Per-agent overrides count as raw secrets too.
        let config = EnvConfig::from_vars(&vars(&[
            (env_vars::NODE_ENV, "production"),
            ("WALLET_SECRET_KEY_DCA_1", "whatever"),
        ]));
        assert_eq!(config.unwrap_err().code(), "INVALID_CONFIG");
    }

    #[test]
    fn short_wallet_password_is_rejected() {
        let config = EnvConfig::from_vars(&vars(&[(env_vars::WALLET_PASSWORD, "hunter2")]));
        assert!(config.unwrap_err().to_string().contains("WALLET_PASSWORD"));
    }

    #[test]
    fn numeric_limits_validate() {
        let config = EnvConfig::from_vars(&vars(&[(env_vars::MAX_PER_TX_SOL, "abc")]));
        assert!(config.is_err());

        let config = EnvConfig::from_vars(&vars(&[(env_vars::MAX_PER_TX_SOL, "-1")]));
        assert!(config.is_err());

        let config = EnvConfig::from_vars(&vars(&[
            (env_vars::MAX_PER_TX_SOL, "2.0"),
            (env_vars::MAX_SESSION_SOL, "1.0"),
        ]));
        assert!(config.is_err());

        let config = EnvConfig::from_vars(&vars(&[
            (env_vars::MAX_PER_TX_SOL, "0.1"),
            (env_vars::MAX_SESSION_SOL, "0.5"),
        ]))
        .unwrap();
        assert_eq!(config.max_per_tx_sol, Some(0.1));
        assert_eq!(config.max_session_sol, Some(0.5));
    }

    #[test]
    fn invalid_network_and_env_are_rejected() {
        assert!(EnvConfig::from_vars(&vars(&[(env_vars::SOLANA_NETWORK, "mainnet")])).is_err());
        assert!(EnvConfig::from_vars(&vars(&[(env_vars::NODE_ENV, "staging")])).is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(EnvConfig::from_vars(&vars(&[(env_vars::AGENT_INTERVAL_MS, "0")])).is_err());
    }

    #[test]
    fn agent_secret_var_name_is_uppercased() {
        assert_eq!(agent_secret_env_var("dca-1"), "WALLET_SECRET_KEY_DCA_1");
        assert_eq!(agent_secret_env_var("maker"), "WALLET_SECRET_KEY_MAKER");
    }

    #[test]
    fn debug_redacts_wallet_password() {
        let config = EnvConfig::from_vars(&vars(&[(env_vars::WALLET_PASSWORD, "correctpassword")]))
            .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("correctpassword"));
        assert!(debug.contains("[redacted]"));
    }

    #[test]
    fn ensure_not_mainnet_accepts_test_clusters() {
        ensure_not_mainnet("https://api.devnet.solana.com").unwrap();
        ensure_not_mainnet("https://api.testnet.solana.com").unwrap();
        ensure_not_mainnet("http://127.0.0.1:8899").unwrap();
        assert!(ensure_not_mainnet("https://solana-mainnet-beta.example.com").is_err());
        assert!(ensure_not_mainnet("not a url").is_err());
    }
}
