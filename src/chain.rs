//! Chain access
//!
//! Narrow trait over the handful of RPC calls the runtime needs, with the
//! production implementation backed by the nonblocking Solana client.
//! Submission failures are classified here so the send engine's retry policy
//! works against stable categories instead of provider error strings.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcTransactionConfig};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{Transaction, TransactionError};
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{TransactionConfirmationStatus, UiTransactionEncoding};

use crate::config::ensure_not_mainnet;
use crate::{Error, Result};

/// Default per-request abort timer.
const RPC_TIMEOUT: Duration = Duration::from_secs(12);

/// Commitment levels, ordered weakest to strongest so `>=` compares reached
/// confirmation depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub(crate) fn to_config(self) -> CommitmentConfig {
        match self {
            Commitment::Processed => CommitmentConfig::processed(),
            Commitment::Confirmed => CommitmentConfig::confirmed(),
            Commitment::Finalized => CommitmentConfig::finalized(),
        }
    }
}

/// Classified transaction submission failure. Only `Transient` and
/// `BlockhashExpired` are retry-eligible.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    #[error("blockhash expired")]
    BlockhashExpired,

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("transient send failure: {0}")]
    Transient(String),
}

/// Result of a preflight simulation.
#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
    pub err: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

/// Signature status as reported by the cluster.
#[derive(Debug, Clone)]
pub struct SignatureStatus {
    pub slot: u64,
    pub err: Option<String>,
    pub commitment: Commitment,
}

#[async_trait]
pub trait ChainClient: Send + Sync + std::fmt::Debug {
    async fn latest_blockhash(&self, commitment: Commitment) -> Result<Hash>;

    async fn simulate_transaction(&self, tx: &Transaction) -> Result<SimulationOutcome>;

    async fn send_transaction(
        &self,
        tx: &Transaction,
    ) -> std::result::Result<Signature, SubmitError>;

    async fn signature_status(&self, signature: &Signature) -> Result<Option<SignatureStatus>>;

    async fn balance(&self, pubkey: &Pubkey) -> Result<u64>;

    /// Balance of a token account; `Ok(None)` when the account is absent.
    async fn token_account_balance(&self, account: &Pubkey) -> Result<Option<u64>>;

    async fn account_exists(&self, pubkey: &Pubkey) -> Result<bool>;

    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8>;

    /// Compute units consumed by a landed transaction. Best effort; `None`
    /// when the node cannot answer.
    async fn transaction_compute_units(&self, signature: &Signature) -> Result<Option<u64>>;
}

/// Production client over a devnet/testnet RPC endpoint.
pub struct SolanaRpc {
    client: RpcClient,
}

impl std::fmt::Debug for SolanaRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaRpc").finish_non_exhaustive()
    }
}

impl SolanaRpc {
    pub fn new(rpc_url: &str) -> Result<Self> {
        ensure_not_mainnet(rpc_url)?;
        Ok(Self {
            client: RpcClient::new_with_timeout_and_commitment(
                rpc_url.to_string(),
                RPC_TIMEOUT,
                CommitmentConfig::confirmed(),
            ),
        })
    }
}

fn rpc_err(err: ClientError) -> Error {
    Error::Rpc(err.to_string())
}

fn classify_send_error(err: ClientError) -> SubmitError {
    let message = err.to_string();
    if message.contains("BlockhashNotFound") || message.contains("Blockhash not found") {
        return SubmitError::BlockhashExpired;
    }
    match err.kind() {
        ClientErrorKind::TransactionError(TransactionError::BlockhashNotFound) => {
            SubmitError::BlockhashExpired
        }
        ClientErrorKind::TransactionError(tx_err) => SubmitError::Rejected(tx_err.to_string()),
        _ => SubmitError::Transient(message),
    }
}

#[async_trait]
impl ChainClient for SolanaRpc {
    async fn latest_blockhash(&self, commitment: Commitment) -> Result<Hash> {
        let (hash, _last_valid_height) = self
            .client
            .get_latest_blockhash_with_commitment(commitment.to_config())
            .await
            .map_err(rpc_err)?;
        Ok(hash)
    }

    async fn simulate_transaction(&self, tx: &Transaction) -> Result<SimulationOutcome> {
        let response = self.client.simulate_transaction(tx).await.map_err(rpc_err)?;
        let value = response.value;
        Ok(SimulationOutcome {
            err: value.err.map(|e| e.to_string()),
            logs: value.logs.unwrap_or_default(),
            units_consumed: value.units_consumed,
        })
    }

    async fn send_transaction(
        &self,
        tx: &Transaction,
    ) -> std::result::Result<Signature, SubmitError> {
        // Preflight already ran through `simulate_transaction`; the node must
        // not re-run it or retry on our behalf.
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            max_retries: Some(0),
            ..Default::default()
        };
        self.client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(classify_send_error)
    }

    async fn signature_status(&self, signature: &Signature) -> Result<Option<SignatureStatus>> {
        let response = self
            .client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(rpc_err)?;
        let status = response.value.into_iter().next().flatten();
        Ok(status.map(|s| SignatureStatus {
            slot: s.slot,
            err: s.err.map(|e| e.to_string()),
            commitment: match s.confirmation_status {
                Some(TransactionConfirmationStatus::Finalized) => Commitment::Finalized,
                Some(TransactionConfirmationStatus::Confirmed) => Commitment::Confirmed,
                _ => Commitment::Processed,
            },
        }))
    }

    async fn balance(&self, pubkey: &Pubkey) -> Result<u64> {
        self.client.get_balance(pubkey).await.map_err(rpc_err)
    }

    async fn token_account_balance(&self, account: &Pubkey) -> Result<Option<u64>> {
        let response = self
            .client
            .get_account_with_commitment(account, CommitmentConfig::confirmed())
            .await
            .map_err(rpc_err)?;
        match response.value {
            None => Ok(None),
            Some(raw) => {
                let parsed = spl_token::state::Account::unpack(&raw.data)
                    .map_err(|e| Error::Rpc(format!("token account {account} unreadable: {e}")))?;
                Ok(Some(parsed.amount))
            }
        }
    }

    async fn account_exists(&self, pubkey: &Pubkey) -> Result<bool> {
        let response = self
            .client
            .get_account_with_commitment(pubkey, CommitmentConfig::confirmed())
            .await
            .map_err(rpc_err)?;
        Ok(response.value.is_some())
    }

    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8> {
        let supply = self
            .client
            .get_token_supply(mint)
            .await
            .map_err(|e| Error::InvalidMint(format!("{mint}: {e}")))?;
        Ok(supply.decimals)
    }

    async fn transaction_compute_units(&self, signature: &Signature) -> Result<Option<u64>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        match self.client.get_transaction_with_config(signature, config).await {
            Ok(tx) => Ok(tx.transaction.meta.and_then(|meta| {
                match meta.compute_units_consumed {
                    OptionSerializer::Some(units) => Some(units),
                    _ => None,
                }
            })),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_order_matches_confirmation_depth() {
        assert!(Commitment::Processed < Commitment::Confirmed);
        assert!(Commitment::Confirmed < Commitment::Finalized);
    }

    #[test]
    fn mainnet_endpoint_is_rejected_at_construction() {
        let err = SolanaRpc::new("https://api.mainnet-beta.solana.com").unwrap_err();
        assert_eq!(err.code(), "MAINNET_BLOCKED");
        assert!(SolanaRpc::new("https://api.devnet.solana.com").is_ok());
    }
}
