//! Band rebalancer: keeps the native balance inside a [min, max] corridor,
//! swapping the excess into the target mint and swapping back out of it
//! when SOL runs low.

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
    min_sol_lamports: u64,
    max_sol_lamports: u64,
    #[serde(default)]
    slippage_bps: Option<u16>,
    /// Cap on a single rebalancing trade.
    #[serde(default)]
    max_trade_lamports: Option<u64>,
}

#[derive(Debug)]
pub struct RebalancerStrategy {
    target_mint: Pubkey,
    min_sol_lamports: u64,
    max_sol_lamports: u64,
    slippage_bps: u16,
    max_trade_lamports: u64,
}

impl RebalancerStrategy {
    pub fn from_params(params: &Value) -> Result<Self> {
        let raw: RawParams = serde_json::from_value(params.clone())
            .map_err(|e| Error::InvalidConfig(format!("rebalancer params: {e}")))?;
        if raw.min_sol_lamports >= raw.max_sol_lamports {
            return Err(Error::InvalidConfig(
                "rebalancer minSolLamports must be below maxSolLamports".into(),
            ));
        }
        Ok(Self {
            target_mint: parse_mint(&raw.target_mint, "targetMint")?,
            min_sol_lamports: raw.min_sol_lamports,
            max_sol_lamports: raw.max_sol_lamports,
            slippage_bps: raw.slippage_bps.unwrap_or(DEFAULT_SLIPPAGE_BPS),
            max_trade_lamports: raw.max_trade_lamports.unwrap_or(u64::MAX),
        })
    }
}

#[async_trait]
impl Strategy for RebalancerStrategy {
    fn name(&self) -> &'static str {
        "rebalancer"
    }

    async fn decide(&mut self, snapshot: &AgentSnapshot) -> Result<Action> {
        let sol = snapshot.sol_balance;

        if sol > self.max_sol_lamports {
            let excess = (sol - self.max_sol_lamports).min(self.max_trade_lamports);
            return Ok(Action::Swap {
                params: SwapParams {
                    input_mint: spl_token::native_mint::id(),
                    output_mint: self.target_mint,
                    amount_in: excess,
                    slippage_bps: self.slippage_bps,
                },
                rationale: format!(
                    "SOL balance {sol} above ceiling {}; rotating {excess} lamports into {}",
                    self.max_sol_lamports, self.target_mint
                ),
            });
        }

        if sol < self.min_sol_lamports {
            let token_balance = snapshot
                .token_balances
                .get(&self.target_mint)
                .copied()
                .unwrap_or(0);
            if token_balance == 0 {
                return Ok(Action::noop(format!(
                    "SOL balance {sol} below floor {} but no {} to sell",
                    self.min_sol_lamports, self.target_mint
                )));
            }
            let sell = token_balance.min(self.max_trade_lamports);
            return Ok(Action::Swap {
                params: SwapParams {
                    input_mint: self.target_mint,
                    output_mint: spl_token::native_mint::id(),
                    amount_in: sell,
                    slippage_bps: self.slippage_bps,
                },
                rationale: format!(
                    "SOL balance {sol} below floor {}; selling {sell} of {} back to SOL",
                    self.min_sol_lamports, self.target_mint
                ),
            });
        }

        Ok(Action::noop(format!(
            "SOL balance {sol} inside [{}, {}] corridor",
            self.min_sol_lamports, self.max_sol_lamports
        )))
    }

    fn tracked_mints(&self) -> Vec<Pubkey> {
        vec![self.target_mint]
    }
}
