//! Agent fleet configuration file
//!
//! A JSON array, one entry per agent. Limits accept either SOL floats or
//! lamport integers (numeric or string); SOL values convert at 10^9 with
//! rounding. Any invalid entry aborts loading with a message naming the
//! agent and the offending field.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::native_token::LAMPORTS_PER_SOL;

use crate::wallet::guard::SpendingLimits;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Dca,
    Rebalancer,
    Monitor,
    MarketMaker,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Dca => "dca",
            StrategyKind::Rebalancer => "rebalancer",
            StrategyKind::Monitor => "monitor",
            StrategyKind::MarketMaker => "market_maker",
        }
    }
}

/// A validated agent entry.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub id: String,
    pub keystore_path: PathBuf,
    pub strategy: StrategyKind,
    pub strategy_params: Value,
    pub interval_ms: u64,
    pub limits: SpendingLimits,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawAgentEntry {
    id: String,
    keystore_path: PathBuf,
    strategy: StrategyKind,
    #[serde(default)]
    strategy_params: Value,
    interval_ms: u64,
    limits: RawLimits,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawLimits {
    max_per_tx_sol: Option<f64>,
    max_session_sol: Option<f64>,
    max_per_tx_lamports: Option<LamportValue>,
    max_session_lamports: Option<LamportValue>,
    allowed_destinations: Option<Vec<String>>,
}

/// Lamport amounts arrive as JSON numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LamportValue {
    Number(u64),
    Text(String),
}

impl LamportValue {
    fn resolve(&self, agent_id: &str, field: &str) -> Result<u64> {
        match self {
            LamportValue::Number(n) => Ok(*n),
            LamportValue::Text(s) => s.parse().map_err(|_| {
                Error::InvalidConfig(format!(
                    "agent `{agent_id}`: {field} must be a lamport integer; got `{s}`"
                ))
            }),
        }
    }
}

pub fn load_agent_configs(path: &Path) -> Result<Vec<AgentConfig>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfig(format!("cannot read agents config {}: {e}", path.display()))
    })?;
    let entries: Vec<RawAgentEntry> = serde_json::from_str(&raw).map_err(|e| {
        Error::InvalidConfig(format!("agents config {} is not valid: {e}", path.display()))
    })?;

    if entries.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "agents config {} contains no agents",
            path.display()
        )));
    }

    let mut seen = HashSet::new();
    entries
        .into_iter()
        .map(|entry| {
            if entry.id.trim().is_empty() {
                return Err(Error::InvalidConfig("agent id must not be empty".into()));
            }
            if !seen.insert(entry.id.clone()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate agent id `{}`",
                    entry.id
                )));
            }
            validate_entry(entry)
        })
        .collect()
}

fn validate_entry(entry: RawAgentEntry) -> Result<AgentConfig> {
    let id = entry.id;

    if entry.interval_ms == 0 {
        return Err(Error::InvalidConfig(format!(
            "agent `{id}`: intervalMs must be > 0"
        )));
    }

    let max_per_tx = resolve_limit(
        &id,
        "maxPerTx",
        entry.limits.max_per_tx_sol,
        entry.limits.max_per_tx_lamports.as_ref(),
    )?;
    let max_session = resolve_limit(
        &id,
        "maxSession",
        entry.limits.max_session_sol,
        entry.limits.max_session_lamports.as_ref(),
    )?;

    let limits = SpendingLimits::new(max_per_tx, max_session, entry.limits.allowed_destinations)
        .map_err(|e| Error::InvalidConfig(format!("agent `{id}`: {e}")))?;

    Ok(AgentConfig {
        id,
        keystore_path: entry.keystore_path,
        strategy: entry.strategy,
        strategy_params: entry.strategy_params,
        interval_ms: entry.interval_ms,
        limits,
    })
}

fn resolve_limit(
    agent_id: &str,
    bound: &str,
    sol: Option<f64>,
    lamports: Option<&LamportValue>,
) -> Result<u64> {
    match (sol, lamports) {
        (Some(_), Some(_)) => Err(Error::InvalidConfig(format!(
            "agent `{agent_id}`: specify {bound}Sol or {bound}Lamports, not both"
        ))),
        (None, None) => Err(Error::InvalidConfig(format!(
            "agent `{agent_id}`: missing {bound}Sol or {bound}Lamports"
        ))),
        (None, Some(value)) => value.resolve(agent_id, &format!("{bound}Lamports")),
        (Some(sol), None) => {
            if !sol.is_finite() || sol <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "agent `{agent_id}`: {bound}Sol must be a positive number; got {sol}"
                )));
            }
            Ok((sol * LAMPORTS_PER_SOL as f64).round() as u64)
        }
    }
}
