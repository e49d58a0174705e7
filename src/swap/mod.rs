//! Swap adapters
//!
//! Each adapter quotes and executes swaps against one venue. The registry
//! races every adapter's quote concurrently with all-settled semantics and
//! picks the best successful answer, so one broken venue never takes the
//! runtime down. The guard-crossing point for every adapter is
//! `WalletClient::sign_and_send_transaction` with the live quote's input
//! amount as the spend estimate.

pub mod jupiter;
pub mod orca;

pub use jupiter::JupiterAdapter;
pub use orca::OrcaAdapter;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use tracing::warn;

use crate::wallet::{TxResult, WalletClient};
use crate::{Error, Result};

/// Slippage applied when the caller asks for a quote without naming one.
pub const DEFAULT_SLIPPAGE_BPS: u16 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Minimum output the swap program will accept under the quoted
    /// slippage.
    pub other_amount_threshold: u64,
    pub price_impact_pct: f64,
    pub provider: String,
    /// Provider payload, passed back verbatim when executing the swap.
    pub raw_opaque: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResult {
    #[serde(flatten)]
    pub tx: TxResult,
    pub in_amount: u64,
    pub actual_out_amount: u64,
    pub quote: Quote,
}

#[async_trait]
pub trait SwapAdapter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    async fn quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount_in: u64,
    ) -> Result<Quote> {
        self.quote_with_slippage(input_mint, output_mint, amount_in, DEFAULT_SLIPPAGE_BPS)
            .await
    }

    async fn quote_with_slippage(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
    ) -> Result<Quote>;

    async fn swap(
        &self,
        wallet: &WalletClient,
        quote: &Quote,
        slippage_bps: u16,
    ) -> Result<SwapResult>;
}

pub struct SwapRegistry {
    adapters: Vec<Arc<dyn SwapAdapter>>,
}

impl SwapRegistry {
    pub fn new(adapters: Vec<Arc<dyn SwapAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn SwapAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .cloned()
            .ok_or_else(|| {
                Error::AdapterUnavailable(format!(
                    "no adapter named `{name}`; registered: {:?}",
                    self.adapter_names()
                ))
            })
    }

    /// Race every adapter concurrently. At least one success wins (highest
    /// `out_amount`, earlier registration breaking ties); all failures
    /// aggregate into one `quote failed` error.
    pub async fn get_best_quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount_in: u64,
    ) -> Result<Quote> {
        if self.adapters.is_empty() {
            return Err(Error::QuoteFailed("no swap adapters registered".into()));
        }

        let races = self.adapters.iter().map(|adapter| {
            let adapter = adapter.clone();
            async move {
                let result = adapter.quote(input_mint, output_mint, amount_in).await;
                (adapter.name(), result)
            }
        });
        let settled = futures::future::join_all(races).await;

        let mut best: Option<Quote> = None;
        let mut failures = Vec::new();
        for (name, result) in settled {
            match result {
                Ok(quote) => {
                    let better = best
                        .as_ref()
                        .map_or(true, |current| quote.out_amount > current.out_amount);
                    if better {
                        best = Some(quote);
                    }
                }
                Err(e) => failures.push(format!("{name}: {e}")),
            }
        }

        best.ok_or_else(|| Error::QuoteFailed(failures.join("; ")))
    }
}

/// Shared tail of every adapter's swap: submit through the guarded signing
/// path, then measure the realized output as the post/pre balance delta.
/// An output below the quoted threshold is logged, not failed; the chain's
/// own slippage check is authoritative.
pub(crate) async fn submit_and_measure(
    wallet: &WalletClient,
    live_quote: Quote,
    tx: Transaction,
) -> Result<SwapResult> {
    let output_mint: Pubkey = live_quote
        .output_mint
        .parse()
        .map_err(|_| Error::InvalidMint(live_quote.output_mint.clone()))?;

    let pre_balance = wallet.get_token_balance(&output_mint).await?;
    let tx_result = wallet
        .sign_and_send_transaction(tx, live_quote.in_amount, None)
        .await?;

    if !tx_result.is_confirmed() {
        return Ok(SwapResult {
            tx: tx_result,
            in_amount: live_quote.in_amount,
            actual_out_amount: 0,
            quote: live_quote,
        });
    }

    let post_balance = wallet.get_token_balance(&output_mint).await?;
    let actual_out_amount = post_balance.saturating_sub(pre_balance);
    if actual_out_amount < live_quote.other_amount_threshold {
        warn!(
            provider = live_quote.provider,
            actual_out_amount,
            threshold = live_quote.other_amount_threshold,
            "swap output landed below the quoted threshold"
        );
    }

    Ok(SwapResult {
        tx: tx_result,
        in_amount: live_quote.in_amount,
        actual_out_amount,
        quote: live_quote,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct FixedQuote {
        name: &'static str,
        out_amount: u64,
        fail: bool,
    }

    #[async_trait]
    impl SwapAdapter for FixedQuote {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn quote_with_slippage(
            &self,
            input_mint: &Pubkey,
            output_mint: &Pubkey,
            amount_in: u64,
            slippage_bps: u16,
        ) -> Result<Quote> {
            if self.fail {
                return Err(Error::AdapterUnavailable(format!(
                    "{} backend not reachable",
                    self.name
                )));
            }
            let out = self.out_amount;
            Ok(Quote {
                input_mint: input_mint.to_string(),
                output_mint: output_mint.to_string(),
                in_amount: amount_in,
                out_amount: out,
                other_amount_threshold: out - out * slippage_bps as u64 / 10_000,
                price_impact_pct: 0.01,
                provider: self.name.to_string(),
                raw_opaque: json!({}),
            })
        }

        async fn swap(
            &self,
            _wallet: &WalletClient,
            _quote: &Quote,
            _slippage_bps: u16,
        ) -> Result<SwapResult> {
            unreachable!("registry tests never execute swaps")
        }
    }

    fn registry(adapters: Vec<FixedQuote>) -> SwapRegistry {
        SwapRegistry::new(
            adapters
                .into_iter()
                .map(|a| Arc::new(a) as Arc<dyn SwapAdapter>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn best_quote_picks_highest_out_amount() {
        let registry = registry(vec![
            FixedQuote { name: "jupiter", out_amount: 9_500_000, fail: false },
            FixedQuote { name: "orca", out_amount: 9_800_000, fail: false },
        ]);

        let quote = registry
            .get_best_quote(&Pubkey::new_unique(), &Pubkey::new_unique(), 1_000_000)
            .await
            .unwrap();
        assert_eq!(quote.provider, "orca");
        assert_eq!(quote.out_amount, 9_800_000);
    }

    #[tokio::test]
    async fn best_quote_falls_back_when_one_adapter_fails() {
        let registry = registry(vec![
            FixedQuote { name: "jupiter", out_amount: 9_500_000, fail: false },
            FixedQuote { name: "orca", out_amount: 0, fail: true },
        ]);

        let quote = registry
            .get_best_quote(&Pubkey::new_unique(), &Pubkey::new_unique(), 1_000_000)
            .await
            .unwrap();
        assert_eq!(quote.provider, "jupiter");
        assert_eq!(quote.out_amount, 9_500_000);
    }

    #[tokio::test]
    async fn all_failures_aggregate_into_quote_failed() {
        let registry = registry(vec![
            FixedQuote { name: "jupiter", out_amount: 0, fail: true },
            FixedQuote { name: "orca", out_amount: 0, fail: true },
        ]);

        let err = registry
            .get_best_quote(&Pubkey::new_unique(), &Pubkey::new_unique(), 1_000_000)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "QUOTE_FAILED");
        let message = err.to_string();
        assert!(message.contains("jupiter"));
        assert!(message.contains("orca"));
    }

    #[tokio::test]
    async fn ties_prefer_registration_order() {
        let registry = registry(vec![
            FixedQuote { name: "jupiter", out_amount: 9_500_000, fail: false },
            FixedQuote { name: "orca", out_amount: 9_500_000, fail: false },
        ]);

        let quote = registry
            .get_best_quote(&Pubkey::new_unique(), &Pubkey::new_unique(), 1_000_000)
            .await
            .unwrap();
        assert_eq!(quote.provider, "jupiter");
    }

    #[tokio::test]
    async fn unknown_adapter_is_unavailable() {
        let registry = registry(vec![FixedQuote { name: "jupiter", out_amount: 1, fail: false }]);
        assert!(registry.get("jupiter").is_ok());
        let err = registry.get("raydium").unwrap_err();
        assert_eq!(err.code(), "ADAPTER_UNAVAILABLE");
    }
}
