//! Shared fixtures for unit tests: a scripted in-memory chain and small
//! transaction builders. Compiled only for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;

use crate::chain::{ChainClient, Commitment, SignatureStatus, SimulationOutcome, SubmitError};
use crate::{Error, Result};

/// Deterministic chain double. Everything succeeds by default: blockhashes
/// are fresh, sends are accepted, and the first status poll reports a
/// confirmed transaction at slot 42. Tests script failures per call.
#[derive(Debug)]
pub(crate) struct MockChain {
    balances: Mutex<HashMap<Pubkey, u64>>,
    token_accounts: Mutex<HashMap<Pubkey, u64>>,
    failing_token_accounts: Mutex<HashSet<Pubkey>>,
    accounts: Mutex<HashSet<Pubkey>>,
    decimals: Mutex<HashMap<Pubkey, u8>>,
    simulation_error: Mutex<Option<String>>,
    send_results: Mutex<VecDeque<std::result::Result<(), SubmitError>>>,
    status_script: Mutex<VecDeque<Option<SignatureStatus>>>,
    never_confirm: Mutex<bool>,
    blockhash_failures: AtomicU32,
    send_attempts: AtomicUsize,
    sent: Mutex<Vec<Transaction>>,
}

impl MockChain {
    pub(crate) fn new() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            token_accounts: Mutex::new(HashMap::new()),
            failing_token_accounts: Mutex::new(HashSet::new()),
            accounts: Mutex::new(HashSet::new()),
            decimals: Mutex::new(HashMap::new()),
            simulation_error: Mutex::new(None),
            send_results: Mutex::new(VecDeque::new()),
            status_script: Mutex::new(VecDeque::new()),
            never_confirm: Mutex::new(false),
            blockhash_failures: AtomicU32::new(0),
            send_attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_balance(&self, owner: Pubkey, lamports: u64) {
        self.balances.lock().unwrap().insert(owner, lamports);
    }

    pub(crate) fn set_token_account(&self, account: Pubkey, amount: u64) {
        self.token_accounts.lock().unwrap().insert(account, amount);
        self.accounts.lock().unwrap().insert(account);
    }

    pub(crate) fn fail_token_account(&self, account: Pubkey) {
        self.failing_token_accounts.lock().unwrap().insert(account);
    }

    pub(crate) fn set_mint_decimals(&self, mint: Pubkey, decimals: u8) {
        self.decimals.lock().unwrap().insert(mint, decimals);
    }

    pub(crate) fn set_simulation_error(&self, error: &str) {
        *self.simulation_error.lock().unwrap() = Some(error.to_string());
    }

    pub(crate) fn push_send_result(&self, result: std::result::Result<(), SubmitError>) {
        self.send_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn push_status(&self, status: Option<SignatureStatus>) {
        self.status_script.lock().unwrap().push_back(status);
    }

    pub(crate) fn never_confirm(&self) {
        *self.never_confirm.lock().unwrap() = true;
    }

    pub(crate) fn fail_blockhash_fetches(&self, count: u32) {
        self.blockhash_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub(crate) fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn sent_transactions(&self) -> Vec<Transaction> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn latest_blockhash(&self, _commitment: Commitment) -> Result<Hash> {
        if self.blockhash_failures.load(Ordering::SeqCst) > 0 {
            self.blockhash_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Rpc("blockhash endpoint unavailable".into()));
        }
        Ok(Hash::new_unique())
    }

    async fn simulate_transaction(&self, _tx: &Transaction) -> Result<SimulationOutcome> {
        let error = self.simulation_error.lock().unwrap().clone();
        Ok(SimulationOutcome {
            err: error,
            logs: vec![],
            units_consumed: Some(150),
        })
    }

    async fn send_transaction(
        &self,
        tx: &Transaction,
    ) -> std::result::Result<Signature, SubmitError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let scripted = self.send_results.lock().unwrap().pop_front();
        match scripted.unwrap_or(Ok(())) {
            Ok(()) => {
                self.sent.lock().unwrap().push(tx.clone());
                Ok(Signature::new_unique())
            }
            Err(e) => Err(e),
        }
    }

    async fn signature_status(&self, _signature: &Signature) -> Result<Option<SignatureStatus>> {
        if let Some(status) = self.status_script.lock().unwrap().pop_front() {
            return Ok(status);
        }
        if *self.never_confirm.lock().unwrap() {
            return Ok(None);
        }
        Ok(Some(SignatureStatus {
            slot: 42,
            err: None,
            commitment: Commitment::Confirmed,
        }))
    }

    async fn balance(&self, pubkey: &Pubkey) -> Result<u64> {
        Ok(*self.balances.lock().unwrap().get(pubkey).unwrap_or(&0))
    }

    async fn token_account_balance(&self, account: &Pubkey) -> Result<Option<u64>> {
        if self.failing_token_accounts.lock().unwrap().contains(account) {
            return Err(Error::Rpc(format!("account {account} fetch failed")));
        }
        Ok(self.token_accounts.lock().unwrap().get(account).copied())
    }

    async fn account_exists(&self, pubkey: &Pubkey) -> Result<bool> {
        Ok(self.accounts.lock().unwrap().contains(pubkey)
            || self.token_accounts.lock().unwrap().contains_key(pubkey))
    }

    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8> {
        self.decimals
            .lock()
            .unwrap()
            .get(mint)
            .copied()
            .ok_or_else(|| Error::InvalidMint(mint.to_string()))
    }

    async fn transaction_compute_units(&self, _signature: &Signature) -> Result<Option<u64>> {
        Ok(Some(150))
    }
}

/// Minimal unsigned transfer for engine tests.
pub(crate) fn transfer_tx() -> Transaction {
    let from = Pubkey::new_unique();
    let to = Pubkey::new_unique();
    let ix = system_instruction::transfer(&from, &to, 1_000);
    Transaction::new_with_payer(&[ix], Some(&from))
}
