//! Wallet capability
//!
//! The `WalletClient` is the only holder of a signing secret. The
//! [`SigningIdentity`](crate::keystore::SigningIdentity) lives in a private
//! field with no accessor; signing happens inside a closure handed to the
//! send engine, so adapters, strategies, and the audit path can hold a
//! `WalletClient` reference without ever being able to reach the secret.
//! String, JSON, and debug forms all reduce to the public key.

pub mod guard;
pub mod sender;

pub use guard::{SpendingLimitGuard, SpendingLimitStatus, SpendingLimits};
pub use sender::{SendConfig, TxResult, TxStatus};

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::config::ensure_not_mainnet;
use crate::keystore::SigningIdentity;
use crate::{Error, Result};

/// Spend estimate charged against the guard for fee-only transactions
/// (token account creation, token transfers).
const NOMINAL_FEE_LAMPORTS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub rpc_url: String,
    pub send: SendConfig,
    /// Priority fee attached to transfers, in microlamports per compute unit.
    pub priority_fee_microlamports: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            rpc_url: crate::config::DEVNET_RPC_URL.to_string(),
            send: SendConfig::default(),
            priority_fee_microlamports: 1_000,
        }
    }
}

pub struct WalletClient {
    // Never exposed: no accessor, not serialized, not in Debug output.
    identity: SigningIdentity,
    public_key: Pubkey,
    rpc: Arc<dyn ChainClient>,
    guard: SpendingLimitGuard,
    config: WalletConfig,
}

impl WalletClient {
    /// Build the capability object. Rejects mainnet endpoints before taking
    /// ownership of the identity.
    pub fn new(
        identity: SigningIdentity,
        limits: SpendingLimits,
        config: WalletConfig,
        rpc: Arc<dyn ChainClient>,
    ) -> Result<Self> {
        ensure_not_mainnet(&config.rpc_url)?;
        let public_key = identity.public_key();
        Ok(Self {
            identity,
            public_key,
            rpc,
            guard: SpendingLimitGuard::new(limits),
            config,
        })
    }

    pub fn public_key(&self) -> Pubkey {
        self.public_key
    }

    pub async fn get_sol_balance(&self) -> Result<u64> {
        self.rpc.balance(&self.public_key).await
    }

    /// Balance of this wallet's associated token account for `mint`; a
    /// missing account reads as zero.
    pub async fn get_token_balance(&self, mint: &Pubkey) -> Result<u64> {
        let ata = get_associated_token_address(&self.public_key, mint);
        Ok(self.rpc.token_account_balance(&ata).await?.unwrap_or(0))
    }

    /// Idempotent: returns the associated token account, creating it
    /// on-chain first when absent.
    pub async fn get_or_create_token_account(&self, mint: &Pubkey) -> Result<Pubkey> {
        let ata = get_associated_token_address(&self.public_key, mint);
        if self.rpc.account_exists(&ata).await? {
            return Ok(ata);
        }

        info!(%mint, %ata, "creating associated token account");
        let ix = create_associated_token_account(
            &self.public_key,
            &self.public_key,
            mint,
            &spl_token::id(),
        );
        let tx = Transaction::new_with_payer(&[ix], Some(&self.public_key));
        let result = self
            .sign_and_send_transaction(tx, NOMINAL_FEE_LAMPORTS, None)
            .await?;
        if !result.is_confirmed() {
            return Err(Error::Rpc(format!(
                "token account creation for {mint} ended {}: {}",
                result.status.as_str(),
                result.error.unwrap_or_default()
            )));
        }
        Ok(ata)
    }

    /// Native transfer with an attached priority-fee instruction.
    pub async fn send_sol(&self, to: &Pubkey, lamports: u64) -> Result<TxResult> {
        if lamports == 0 {
            return Err(Error::InvalidConfig("transfer amount must be positive".into()));
        }
        let balance = self.get_sol_balance().await?;
        if balance < lamports {
            return Err(Error::InsufficientFunds(format!(
                "balance {balance} lamports < requested {lamports} lamports"
            )));
        }

        let ixs = vec![
            self.priority_fee_instruction(),
            system_instruction::transfer(&self.public_key, to, lamports),
        ];
        let tx = Transaction::new_with_payer(&ixs, Some(&self.public_key));
        self.sign_and_send_transaction(tx, lamports, Some(&to.to_string()))
            .await
    }

    /// Checked token transfer. Ensures the source account exists (which may
    /// itself send a create transaction) and creates the recipient's
    /// associated account in the same transaction when missing.
    pub async fn send_token(&self, mint: &Pubkey, to: &Pubkey, amount: u64) -> Result<TxResult> {
        if amount == 0 {
            return Err(Error::InvalidConfig("transfer amount must be positive".into()));
        }

        let decimals = self.rpc.mint_decimals(mint).await?;
        let source = self.get_or_create_token_account(mint).await?;
        let destination = get_associated_token_address(to, mint);

        let mut ixs = vec![self.priority_fee_instruction()];
        if !self.rpc.account_exists(&destination).await? {
            debug!(%to, %mint, "recipient token account missing; creating in-flight");
            ixs.push(create_associated_token_account(
                &self.public_key,
                to,
                mint,
                &spl_token::id(),
            ));
        }
        ixs.push(
            spl_token::instruction::transfer_checked(
                &spl_token::id(),
                &source,
                mint,
                &destination,
                &self.public_key,
                &[],
                amount,
                decimals,
            )
            .map_err(|e| Error::InvalidMint(format!("{mint}: {e}")))?,
        );

        let tx = Transaction::new_with_payer(&ixs, Some(&self.public_key));
        self.sign_and_send_transaction(tx, NOMINAL_FEE_LAMPORTS, Some(&to.to_string()))
            .await
    }

    /// Sign in place without a guard check. Reserved for adapter
    /// pre-submission flows whose transaction is subsequently submitted via
    /// [`sign_and_send_transaction`](Self::sign_and_send_transaction).
    pub fn sign_transaction(&self, tx: &mut Transaction) -> Result<()> {
        let keypair = self.identity.keypair()?;
        let blockhash = tx.message.recent_blockhash;
        tx.try_sign(&[&keypair], blockhash)
            .map_err(|e| Error::SigningFailed(e.to_string()))
    }

    /// The guarded signing path. With a positive estimate the guard check
    /// runs before the signer closure; spend is recorded only on a
    /// confirmed result.
    pub async fn sign_and_send_transaction(
        &self,
        mut tx: Transaction,
        estimated_lamports: u64,
        destination: Option<&str>,
    ) -> Result<TxResult> {
        if estimated_lamports > 0 {
            self.guard.check(estimated_lamports, destination)?;
        }

        let identity = &self.identity;
        let result = sender::send_and_confirm(
            &mut tx,
            |tx, blockhash| {
                let keypair = identity.keypair()?;
                tx.try_sign(&[&keypair], blockhash)
                    .map_err(|e| Error::SigningFailed(e.to_string()))
            },
            self.rpc.as_ref(),
            &self.config.send,
        )
        .await?;

        if result.is_confirmed() && estimated_lamports > 0 {
            self.guard.record(estimated_lamports);
        } else if !result.is_confirmed() {
            warn!(
                wallet = %self.public_key,
                status = result.status.as_str(),
                error = result.error.as_deref().unwrap_or(""),
                "transaction did not confirm"
            );
        }
        Ok(result)
    }

    pub fn spending_limit_status(&self) -> SpendingLimitStatus {
        self.guard.status()
    }

    #[cfg(test)]
    pub(crate) fn guard(&self) -> &SpendingLimitGuard {
        &self.guard
    }

    fn priority_fee_instruction(&self) -> Instruction {
        ComputeBudgetInstruction::set_compute_unit_price(self.config.priority_fee_microlamports)
    }
}

/// The canonical string form is the base58 public key, nothing else.
impl fmt::Display for WalletClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.public_key)
    }
}

/// Debug never renders the identity.
impl fmt::Debug for WalletClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletClient({})", self.public_key)
    }
}

/// JSON form is the bare public-key string.
impl Serialize for WalletClient {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.public_key.to_string())
    }
}
