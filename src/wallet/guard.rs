//! Spending limit guard
//!
//! Synchronous pre-signing gate. Every guarded signing path calls
//! [`SpendingLimitGuard::check`] before the signer closure runs and
//! [`SpendingLimitGuard::record`] only after the chain confirms. The check
//! never suspends and never touches I/O, so the loop's ordering guarantee
//! (check strictly precedes signing) holds by construction.

use std::sync::Mutex;

use serde::Serialize;
use solana_sdk::native_token::LAMPORTS_PER_SOL;

use crate::{Error, Result};

/// Immutable limit configuration. Validated on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendingLimits {
    max_per_tx_lamports: u64,
    max_session_lamports: u64,
    allowed_destinations: Option<Vec<String>>,
}

impl SpendingLimits {
    /// `allowed_destinations: None` means any destination is permitted; an
    /// empty list is a configuration error, not "deny all".
    pub fn new(
        max_per_tx_lamports: u64,
        max_session_lamports: u64,
        allowed_destinations: Option<Vec<String>>,
    ) -> Result<Self> {
        if max_per_tx_lamports == 0 {
            return Err(Error::InvalidConfig("maxPerTxLamports must be > 0".into()));
        }
        if max_session_lamports == 0 {
            return Err(Error::InvalidConfig("maxSessionLamports must be > 0".into()));
        }
        if max_per_tx_lamports > max_session_lamports {
            return Err(Error::InvalidConfig(format!(
                "maxPerTxLamports ({max_per_tx_lamports}) must not exceed maxSessionLamports ({max_session_lamports})"
            )));
        }
        if let Some(list) = &allowed_destinations {
            if list.is_empty() {
                return Err(Error::InvalidConfig(
                    "destination allowlist must not be empty; omit it to allow any destination"
                        .into(),
                ));
            }
        }
        Ok(Self {
            max_per_tx_lamports,
            max_session_lamports,
            allowed_destinations,
        })
    }

    pub fn max_per_tx_lamports(&self) -> u64 {
        self.max_per_tx_lamports
    }

    pub fn max_session_lamports(&self) -> u64 {
        self.max_session_lamports
    }
}

/// Non-sensitive snapshot for observability accessors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingLimitStatus {
    pub max_per_tx_lamports: u64,
    pub max_session_lamports: u64,
    pub session_spend_lamports: u64,
    pub remaining_session_lamports: u64,
    pub allowed_destinations: Option<Vec<String>>,
}

pub struct SpendingLimitGuard {
    limits: SpendingLimits,
    session_spend: Mutex<u64>,
}

impl SpendingLimitGuard {
    pub fn new(limits: SpendingLimits) -> Self {
        Self {
            limits,
            session_spend: Mutex::new(0),
        }
    }

    fn spend(&self) -> u64 {
        match self.session_spend.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Side-effect-free invariant check. Two sequential calls with the same
    /// argument agree; only [`record`](Self::record) moves the budget.
    pub fn check(&self, estimated_lamports: u64, destination: Option<&str>) -> Result<()> {
        let spent = self.spend();

        if spent.saturating_add(estimated_lamports) > self.limits.max_session_lamports {
            return Err(Error::LimitBreach(format!(
                "session cap exceeded: spent {spent} + estimated {estimated_lamports} > {} lamports ({} SOL)",
                self.limits.max_session_lamports,
                lamports_to_sol_string(self.limits.max_session_lamports),
            )));
        }

        if estimated_lamports > self.limits.max_per_tx_lamports {
            return Err(Error::LimitBreach(format!(
                "estimated {estimated_lamports} lamports ({} SOL) exceeds per-tx limit of {} lamports ({} SOL)",
                lamports_to_sol_string(estimated_lamports),
                self.limits.max_per_tx_lamports,
                lamports_to_sol_string(self.limits.max_per_tx_lamports),
            )));
        }

        if let Some(allowlist) = &self.limits.allowed_destinations {
            match destination {
                None => {
                    return Err(Error::LimitBreach(
                        "destination required: an allowlist is configured and the transaction names none"
                            .into(),
                    ));
                }
                Some(dest) if !allowlist.iter().any(|a| a == dest) => {
                    return Err(Error::LimitBreach(format!(
                        "destination {dest} is not in the configured allowlist"
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Add confirmed spend to the session total. Callers must only invoke
    /// this after a `confirmed` transaction result.
    pub fn record(&self, actual_lamports: u64) {
        let mut guard = match self.session_spend.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = guard.saturating_add(actual_lamports);
    }

    pub fn session_spend(&self) -> u64 {
        self.spend()
    }

    pub fn status(&self) -> SpendingLimitStatus {
        let spent = self.spend();
        SpendingLimitStatus {
            max_per_tx_lamports: self.limits.max_per_tx_lamports,
            max_session_lamports: self.limits.max_session_lamports,
            session_spend_lamports: spent,
            remaining_session_lamports: self.limits.max_session_lamports.saturating_sub(spent),
            allowed_destinations: self.limits.allowed_destinations.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn reset(&self) {
        let mut guard = match self.session_spend.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = 0;
    }
}

pub(crate) fn lamports_to_sol_string(lamports: u64) -> String {
    format!("{:.6}", lamports as f64 / LAMPORTS_PER_SOL as f64)
}
