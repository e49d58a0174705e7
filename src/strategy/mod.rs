//! Trading strategies
//!
//! A strategy looks at one tick's state snapshot and decides an [`Action`];
//! the loop pattern-matches the tagged variant, so there is no untyped
//! params map to mis-cast. Amounts serialize to strings in audit payloads
//! to keep them exact in every consumer.

pub mod dca;
pub mod market_maker;
pub mod monitor;
pub mod rebalancer;

pub use dca::DcaStrategy;
pub use market_maker::MarketMakerStrategy;
pub use monitor::MonitorStrategy;
pub use rebalancer::RebalancerStrategy;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;

use crate::config::StrategyKind;
use crate::swap::SwapRegistry;
use crate::wallet::{TxResult, WalletClient};
use crate::{Error, Result};

/// Per-tick state handed to `decide` and discarded afterwards.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub sol_balance: u64,
    pub token_balances: HashMap<Pubkey, u64>,
    pub tick_count: u64,
    pub last_action_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SwapParams {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub amount_in: u64,
    pub slippage_bps: u16,
}

#[derive(Debug, Clone)]
pub struct TransferParams {
    pub to: Pubkey,
    pub lamports: u64,
}

#[derive(Debug, Clone)]
pub struct LpParams {
    pub pool: String,
    pub amount_a: u64,
    pub amount_b: u64,
}

/// What a strategy wants done this tick.
#[derive(Debug, Clone)]
pub enum Action {
    Swap { params: SwapParams, rationale: String },
    Transfer { params: TransferParams, rationale: String },
    ProvideLiquidity { params: LpParams, rationale: String },
    Noop { rationale: String },
}

impl Action {
    pub fn noop(rationale: impl Into<String>) -> Self {
        Action::Noop { rationale: rationale.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Swap { .. } => "swap",
            Action::Transfer { .. } => "transfer",
            Action::ProvideLiquidity { .. } => "provide_liquidity",
            Action::Noop { .. } => "noop",
        }
    }

    pub fn rationale(&self) -> &str {
        match self {
            Action::Swap { rationale, .. }
            | Action::Transfer { rationale, .. }
            | Action::ProvideLiquidity { rationale, .. }
            | Action::Noop { rationale } => rationale,
        }
    }

    /// Audit-safe rendering. Amounts become strings so downstream JSON
    /// consumers never round them.
    pub fn params_json(&self) -> Value {
        match self {
            Action::Swap { params, .. } => json!({
                "inputMint": params.input_mint.to_string(),
                "outputMint": params.output_mint.to_string(),
                "amountIn": params.amount_in.to_string(),
                "slippageBps": params.slippage_bps,
            }),
            Action::Transfer { params, .. } => json!({
                "to": params.to.to_string(),
                "lamports": params.lamports.to_string(),
            }),
            Action::ProvideLiquidity { params, .. } => json!({
                "pool": params.pool,
                "amountA": params.amount_a.to_string(),
                "amountB": params.amount_b.to_string(),
            }),
            Action::Noop { .. } => json!({}),
        }
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn decide(&mut self, snapshot: &AgentSnapshot) -> Result<Action>;

    /// Default execution routes through the shared executor; strategies
    /// override only when they need venue-specific handling.
    async fn execute(
        &mut self,
        action: &Action,
        wallet: &WalletClient,
        registry: &SwapRegistry,
    ) -> Result<Option<TxResult>> {
        execute_action(action, wallet, registry).await
    }

    /// Mints whose balances belong in the tick snapshot.
    fn tracked_mints(&self) -> Vec<Pubkey> {
        Vec::new()
    }
}

/// Closed factory over the supported strategy kinds.
pub fn build_strategy(kind: StrategyKind, params: &Value) -> Result<Box<dyn Strategy>> {
    Ok(match kind {
        StrategyKind::Dca => Box::new(DcaStrategy::from_params(params)?),
        StrategyKind::Rebalancer => Box::new(RebalancerStrategy::from_params(params)?),
        StrategyKind::Monitor => Box::new(MonitorStrategy::new()),
        StrategyKind::MarketMaker => Box::new(MarketMakerStrategy::from_params(params)?),
    })
}

/// Shared action executor. Swaps race the registry for the best quote and
/// hand the winner's adapter the guard-crossing submission.
pub async fn execute_action(
    action: &Action,
    wallet: &WalletClient,
    registry: &SwapRegistry,
) -> Result<Option<TxResult>> {
    match action {
        Action::Noop { .. } => Ok(None),
        Action::Transfer { params, .. } => {
            wallet.send_sol(&params.to, params.lamports).await.map(Some)
        }
        Action::Swap { params, .. } => {
            let quote = registry
                .get_best_quote(&params.input_mint, &params.output_mint, params.amount_in)
                .await?;
            let adapter = registry.get(&quote.provider)?;
            let result = adapter.swap(wallet, &quote, params.slippage_bps).await?;
            Ok(Some(result.tx))
        }
        Action::ProvideLiquidity { params, .. } => Err(Error::PoolNotFound(format!(
            "no liquidity venue configured for pool `{}`",
            params.pool
        ))),
    }
}

pub(crate) fn parse_mint(value: &str, field: &str) -> Result<Pubkey> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{field} is not a valid mint: `{value}`")))
}
