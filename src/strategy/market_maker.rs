//! Two-sided AMM market making: alternate small buys and sells of one mint,
//! skipping the side the current inventory cannot fund.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;

use super::{parse_mint, Action, AgentSnapshot, Strategy, SwapParams};
use crate::swap::DEFAULT_SLIPPAGE_BPS;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawParams {
    mint: String,
    quote_size_lamports: u64,
    #[serde(default)]
    slippage_bps: Option<u16>,
    #[serde(default)]
    reserve_lamports: Option<u64>,
}

pub struct MarketMakerStrategy {
    mint: Pubkey,
    quote_size_lamports: u64,
    slippage_bps: u16,
    reserve_lamports: u64,
    next_side: Side,
}

impl MarketMakerStrategy {
    pub fn from_params(params: &Value) -> Result<Self> {
        let raw: RawParams = serde_json::from_value(params.clone())
            .map_err(|e| Error::InvalidConfig(format!("market_maker params: {e}")))?;
        if raw.quote_size_lamports == 0 {
            return Err(Error::InvalidConfig(
                "market_maker quoteSizeLamports must be > 0".into(),
            ));
        }
        Ok(Self {
            mint: parse_mint(&raw.mint, "mint")?,
            quote_size_lamports: raw.quote_size_lamports,
            slippage_bps: raw.slippage_bps.unwrap_or(DEFAULT_SLIPPAGE_BPS),
            reserve_lamports: raw.reserve_lamports.unwrap_or(10_000_000),
            next_side: Side::Buy,
        })
    }

    fn buy(&self) -> Action {
        Action::Swap {
            params: SwapParams {
                input_mint: spl_token::native_mint::id(),
                output_mint: self.mint,
                amount_in: self.quote_size_lamports,
                slippage_bps: self.slippage_bps,
            },
            rationale: format!("market-making buy leg of {} lamports", self.quote_size_lamports),
        }
    }

    fn sell(&self, token_balance: u64) -> Action {
        let size = token_balance.min(self.quote_size_lamports);
        Action::Swap {
            params: SwapParams {
                input_mint: self.mint,
                output_mint: spl_token::native_mint::id(),
                amount_in: size,
                slippage_bps: self.slippage_bps,
            },
            rationale: format!("market-making sell leg of {size} units"),
        }
    }
}

#[async_trait]
impl Strategy for MarketMakerStrategy {
    fn name(&self) -> &'static str {
        "market_maker"
    }

    async fn decide(&mut self, snapshot: &AgentSnapshot) -> Result<Action> {
        let spendable = snapshot.sol_balance.saturating_sub(self.reserve_lamports);
        let token_balance = snapshot.token_balances.get(&self.mint).copied().unwrap_or(0);

        let can_buy = spendable >= self.quote_size_lamports;
        let can_sell = token_balance > 0;

        let action = match (self.next_side, can_buy, can_sell) {
            (Side::Buy, true, _) => {
                self.next_side = Side::Sell;
                self.buy()
            }
            (Side::Sell, _, true) => {
                self.next_side = Side::Buy;
                self.sell(token_balance)
            }
            // Preferred side is unfunded; take the other when possible.
            (Side::Buy, false, true) => {
                self.next_side = Side::Buy;
                self.sell(token_balance)
            }
            (Side::Sell, true, false) => {
                self.next_side = Side::Sell;
                self.buy()
            }
            _ => Action::noop(format!(
                "no side fundable: spendable {spendable} lamports, inventory {token_balance}"
            )),
        };
        Ok(action)
    }

    fn tracked_mints(&self) -> Vec<Pubkey> {
        vec![self.mint]
    }
}
