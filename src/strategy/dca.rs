//! Dollar-cost averaging: buy a fixed amount of the target mint on a fixed
//! tick cadence, funded from native SOL (routed through the wrapped mint).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;

use super::{parse_mint, Action, AgentSnapshot, Strategy, SwapParams};
use crate::swap::DEFAULT_SLIPPAGE_BPS;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawParams {
    target_mint: String,
    amount_lamports: u64,
    every_n_ticks: u64,
    #[serde(default)]
    slippage_bps: Option<u16>,
    /// Keep at least this much SOL untouched for fees.
    #[serde(default)]
    reserve_lamports: Option<u64>,
}

#[derive(Debug)]
pub struct DcaStrategy {
    target_mint: Pubkey,
    amount_lamports: u64,
    every_n_ticks: u64,
    slippage_bps: u16,
    reserve_lamports: u64,
}

impl DcaStrategy {
    pub fn from_params(params: &Value) -> Result<Self> {
        let raw: RawParams = serde_json::from_value(params.clone())
            .map_err(|e| Error::InvalidConfig(format!("dca params: {e}")))?;
        if raw.amount_lamports == 0 {
            return Err(Error::InvalidConfig("dca amountLamports must be > 0".into()));
        }
        if raw.every_n_ticks == 0 {
            return Err(Error::InvalidConfig("dca everyNTicks must be > 0".into()));
        }
        Ok(Self {
            target_mint: parse_mint(&raw.target_mint, "targetMint")?,
            amount_lamports: raw.amount_lamports,
            every_n_ticks: raw.every_n_ticks,
            slippage_bps: raw.slippage_bps.unwrap_or(DEFAULT_SLIPPAGE_BPS),
            reserve_lamports: raw.reserve_lamports.unwrap_or(10_000_000),
        })
    }
}

#[async_trait]
impl Strategy for DcaStrategy {
    fn name(&self) -> &'static str {
        "dca"
    }

    async fn decide(&mut self, snapshot: &AgentSnapshot) -> Result<Action> {
        if snapshot.tick_count % self.every_n_ticks != 0 {
            return Ok(Action::noop(format!(
                "waiting for tick cadence ({} of every {})",
                snapshot.tick_count % self.every_n_ticks,
                self.every_n_ticks
            )));
        }

        let spendable = snapshot.sol_balance.saturating_sub(self.reserve_lamports);
        if spendable < self.amount_lamports {
            return Ok(Action::noop(format!(
                "insufficient spendable balance: {spendable} lamports < buy size {}",
                self.amount_lamports
            )));
        }

        Ok(Action::Swap {
            params: SwapParams {
                input_mint: spl_token::native_mint::id(),
                output_mint: self.target_mint,
                amount_in: self.amount_lamports,
                slippage_bps: self.slippage_bps,
            },
            rationale: format!(
                "scheduled buy of {} lamports into {} at tick {}",
                self.amount_lamports, self.target_mint, snapshot.tick_count
            ),
        })
    }

    fn tracked_mints(&self) -> Vec<Pubkey> {
        vec![self.target_mint]
    }
}
