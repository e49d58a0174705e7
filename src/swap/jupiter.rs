//! Jupiter aggregator adapter
//!
//! Quotes come from the v6 HTTP API; the swap endpoint assembles the
//! transaction server-side and returns it base64-encoded. We request the
//! legacy encoding so the send engine's transaction type applies, and we
//! keep the raw quote payload opaque, passing it back verbatim on swap.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use async_trait::async_trait;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use std::time::Duration;

use super::{submit_and_measure, Quote, SwapAdapter, SwapResult};
use crate::wallet::WalletClient;
use crate::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://quote-api.jup.ag/v6";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct JupiterAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl JupiterAdapter {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

impl Default for JupiterAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwapAdapter for JupiterAdapter {
    fn name(&self) -> &'static str {
        "jupiter"
    }

    async fn quote_with_slippage(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
    ) -> Result<Quote> {
        let response = self
            .http
            .get(format!("{}/quote", self.base_url))
            .query(&[
                ("inputMint", input_mint.to_string()),
                ("outputMint", output_mint.to_string()),
                ("amount", amount_in.to_string()),
                ("slippageBps", slippage_bps.to_string()),
                ("asLegacyTransaction", "true".to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::QuoteFailed(format!("jupiter: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::QuoteFailed(format!(
                "jupiter quote returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::QuoteFailed(format!("jupiter quote body: {e}")))?;
        quote_from_response(input_mint, output_mint, body)
    }

    async fn swap(
        &self,
        wallet: &WalletClient,
        quote: &Quote,
        slippage_bps: u16,
    ) -> Result<SwapResult> {
        let input_mint: Pubkey = quote
            .input_mint
            .parse()
            .map_err(|_| Error::InvalidMint(quote.input_mint.clone()))?;
        let output_mint: Pubkey = quote
            .output_mint
            .parse()
            .map_err(|_| Error::InvalidMint(quote.output_mint.clone()))?;

        // Re-quote under the caller's slippage so the threshold the program
        // enforces matches what the caller asked for.
        let live_quote = self
            .quote_with_slippage(&input_mint, &output_mint, quote.in_amount, slippage_bps)
            .await?;

        let response = self
            .http
            .post(format!("{}/swap", self.base_url))
            .json(&json!({
                "quoteResponse": live_quote.raw_opaque,
                "userPublicKey": wallet.public_key().to_string(),
                "wrapAndUnwrapSol": true,
                "asLegacyTransaction": true,
            }))
            .send()
            .await
            .map_err(|e| Error::SwapFailed(format!("jupiter: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::SwapFailed(format!(
                "jupiter swap returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::SwapFailed(format!("jupiter swap body: {e}")))?;
        let encoded = body
            .get("swapTransaction")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::SwapFailed("jupiter swap response missing transaction".into()))?;

        let raw = BASE64
            .decode(encoded)
            .map_err(|e| Error::SwapFailed(format!("jupiter transaction encoding: {e}")))?;
        let tx: Transaction = bincode::deserialize(&raw)
            .map_err(|e| Error::SwapFailed(format!("jupiter transaction payload: {e}")))?;

        submit_and_measure(wallet, live_quote, tx).await
    }
}

fn quote_from_response(input_mint: &Pubkey, output_mint: &Pubkey, body: Value) -> Result<Quote> {
    Ok(Quote {
        input_mint: input_mint.to_string(),
        output_mint: output_mint.to_string(),
        in_amount: u64_field(&body, "inAmount")?,
        out_amount: u64_field(&body, "outAmount")?,
        other_amount_threshold: u64_field(&body, "otherAmountThreshold")?,
        price_impact_pct: f64_field(&body, "priceImpactPct").unwrap_or(0.0),
        provider: "jupiter".into(),
        raw_opaque: body,
    })
}

/// Amount fields arrive as JSON strings or numbers depending on API version.
fn u64_field(body: &Value, name: &str) -> Result<u64> {
    let value = body
        .get(name)
        .ok_or_else(|| Error::QuoteFailed(format!("jupiter quote missing `{name}`")))?;
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::QuoteFailed(format!("jupiter `{name}` out of range"))),
        Value::String(s) => s
            .parse()
            .map_err(|_| Error::QuoteFailed(format!("jupiter `{name}` is not an integer: {s}"))),
        _ => Err(Error::QuoteFailed(format!("jupiter `{name}` has wrong type"))),
    }
}

fn f64_field(body: &Value, name: &str) -> Option<f64> {
    match body.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
