//! Transaction send/confirm engine
//!
//! Drives one transaction from blockhash attachment through signing,
//! optional preflight simulation, submission, and confirmation polling. The
//! engine only ever sees a signing callback, never the secret; terminal
//! failures come back as a non-confirmed [`TxResult`] rather than an error,
//! so callers always learn the signature when one exists.

use std::time::Duration;

use serde::Serialize;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::chain::{ChainClient, Commitment, SubmitError};
use crate::{Error, Result};

/// Terminal states of one send attempt. `Confirmed` is the sole success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Confirmed,
    Failed,
    Timeout,
    Simulated,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
            TxStatus::Timeout => "timeout",
            TxStatus::Simulated => "simulated",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxResult {
    pub signature: Option<String>,
    pub status: TxStatus,
    pub slot: Option<u64>,
    pub error: Option<String>,
    pub compute_units_consumed: Option<u64>,
}

impl TxResult {
    pub fn confirmed(signature: Signature, slot: u64, compute_units: Option<u64>) -> Self {
        Self {
            signature: Some(signature.to_string()),
            status: TxStatus::Confirmed,
            slot: Some(slot),
            error: None,
            compute_units_consumed: compute_units,
        }
    }

    pub fn failed(signature: Option<Signature>, slot: Option<u64>, error: String) -> Self {
        Self {
            signature: signature.map(|s| s.to_string()),
            status: TxStatus::Failed,
            slot,
            error: Some(error),
            compute_units_consumed: None,
        }
    }

    pub fn timeout(signature: Option<Signature>, error: String) -> Self {
        Self {
            signature: signature.map(|s| s.to_string()),
            status: TxStatus::Timeout,
            slot: None,
            error: Some(error),
            compute_units_consumed: None,
        }
    }

    pub fn simulated(error: String) -> Self {
        Self {
            signature: None,
            status: TxStatus::Simulated,
            slot: None,
            error: Some(error),
            compute_units_consumed: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TxStatus::Confirmed
    }
}

/// Tuning for the engine. Defaults match devnet behavior; tests shrink the
/// delays.
#[derive(Debug, Clone)]
pub struct SendConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub commitment: Commitment,
    pub simulate_before_send: bool,
    pub confirm_poll_ms: u64,
    pub confirm_timeout_ms: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            commitment: Commitment::Confirmed,
            simulate_before_send: true,
            confirm_poll_ms: 2_000,
            confirm_timeout_ms: 60_000,
        }
    }
}

/// Send a transaction and wait for confirmation. The signing callback is the
/// engine's only path to a signed artifact.
pub async fn send_and_confirm<F>(
    tx: &mut Transaction,
    sign: F,
    rpc: &dyn ChainClient,
    config: &SendConfig,
) -> Result<TxResult>
where
    F: Fn(&mut Transaction, Hash) -> Result<()>,
{
    let mut delay = Duration::from_millis(config.retry_delay_ms.max(1));
    let mut last_error = String::from("no attempt completed");

    for attempt in 1..=config.max_retries.max(1) {
        if attempt > 1 {
            sleep(delay).await;
            delay *= 2;
        }

        let blockhash = match rpc.latest_blockhash(config.commitment).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(attempt, error = %e, "blockhash fetch failed");
                last_error = e.to_string();
                continue;
            }
        };

        tx.message.recent_blockhash = blockhash;
        if let Err(e) = sign(tx, blockhash) {
            // Signer failures are never retried.
            return Err(match e {
                Error::SigningFailed(_) => e,
                other => Error::SigningFailed(other.to_string()),
            });
        }

        if config.simulate_before_send {
            match rpc.simulate_transaction(tx).await {
                Ok(sim) => {
                    if let Some(program_err) = sim.err {
                        debug!(error = %program_err, logs = ?sim.logs, "simulation rejected");
                        return Ok(TxResult::simulated(program_err));
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "simulation RPC failed");
                    last_error = e.to_string();
                    continue;
                }
            }
        }

        let signature = match rpc.send_transaction(tx).await {
            Ok(signature) => signature,
            Err(SubmitError::BlockhashExpired) => {
                warn!(attempt, "blockhash expired before submission");
                last_error = "blockhash expired".into();
                continue;
            }
            Err(SubmitError::Rejected(message)) => {
                return Ok(TxResult::failed(None, None, message));
            }
            Err(SubmitError::Transient(message)) => {
                warn!(attempt, error = %message, "transient submission failure");
                last_error = message;
                continue;
            }
        };

        debug!(%signature, attempt, "transaction submitted");
        return Ok(confirm(signature, rpc, config).await);
    }

    Ok(TxResult::timeout(
        None,
        format!(
            "Exhausted {} attempts: {last_error}",
            config.max_retries.max(1)
        ),
    ))
}

/// Poll signature status until the configured commitment is reached, the
/// chain reports an error, or the confirmation window closes.
async fn confirm(signature: Signature, rpc: &dyn ChainClient, config: &SendConfig) -> TxResult {
    let deadline = Instant::now() + Duration::from_millis(config.confirm_timeout_ms);

    loop {
        match rpc.signature_status(&signature).await {
            Ok(Some(status)) => {
                if let Some(chain_err) = status.err {
                    return TxResult::failed(Some(signature), Some(status.slot), chain_err);
                }
                if status.commitment >= config.commitment {
                    let units = rpc
                        .transaction_compute_units(&signature)
                        .await
                        .unwrap_or(None);
                    return TxResult::confirmed(signature, status.slot, units);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(%signature, error = %e, "status poll failed"),
        }

        if Instant::now() >= deadline {
            // The transaction may still land later; the caller must not
            // record spend for a timeout.
            return TxResult::timeout(
                Some(signature),
                format!(
                    "confirmation not reached within {}ms",
                    config.confirm_timeout_ms
                ),
            );
        }
        sleep(Duration::from_millis(config.confirm_poll_ms.max(1))).await;
    }
}
