//! Agent tick loop
//!
//! One loop drives one wallet. `start` never rejects: every tick is
//! crash-isolated, so a strategy error becomes an audit row and the loop
//! keeps running. Stop is cooperative (the in-flight tick always finishes),
//! and the audit database doubles as a remote-stop mailbox checked at the
//! top of each tick.

pub mod manager;

pub use manager::MultiAgentManager;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::audit::{AuditDb, EventKind};
use crate::strategy::{Action, AgentSnapshot, Strategy};
use crate::swap::SwapRegistry;
use crate::wallet::{TxStatus, WalletClient};
use crate::Result;

/// Seconds of slack when comparing a remote stop signal against
/// `started_at`, so a signal raced with a restart still lands but stale
/// signals from a previous incarnation do not.
const REMOTE_STOP_BUFFER_SECS: i64 = 2;

const REMOTE_STOP_REASON: &str = "Remote stop signal received";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    Idle,
    Running,
    Stopped,
    Error,
}

/// Observable loop state. Mutated only by the loop's own task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLoopState {
    pub status: LoopStatus,
    pub tick_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_action_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl AgentLoopState {
    fn new() -> Self {
        Self {
            status: LoopStatus::Idle,
            tick_count: 0,
            started_at: None,
            last_tick_at: None,
            last_action_at: None,
            last_error: None,
        }
    }
}

enum TickFlow {
    Continue,
    RemoteStop,
}

pub struct AgentLoop {
    agent_id: String,
    wallet_pk: String,
    interval: Duration,
    wallet: Arc<WalletClient>,
    strategy: tokio::sync::Mutex<Box<dyn Strategy>>,
    registry: Arc<SwapRegistry>,
    audit: Arc<AuditDb>,
    stop: Arc<AtomicBool>,
    state: std::sync::Mutex<AgentLoopState>,
}

impl AgentLoop {
    pub fn new(
        agent_id: impl Into<String>,
        interval_ms: u64,
        wallet: Arc<WalletClient>,
        strategy: Box<dyn Strategy>,
        registry: Arc<SwapRegistry>,
        audit: Arc<AuditDb>,
    ) -> Self {
        let wallet_pk = wallet.public_key().to_string();
        Self {
            agent_id: agent_id.into(),
            wallet_pk,
            interval: Duration::from_millis(interval_ms.max(1)),
            wallet,
            strategy: tokio::sync::Mutex::new(strategy),
            registry,
            audit,
            stop: Arc::new(AtomicBool::new(false)),
            state: std::sync::Mutex::new(AgentLoopState::new()),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> AgentLoopState {
        self.lock_state(|state| state.clone())
    }

    /// Cooperative stop: the in-flight tick finishes, then the loop exits.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Main driver. Never returns an error; tick failures are recorded and
    /// the loop continues until stopped.
    pub async fn start(&self) {
        let proceed = self.lock_state(|state| {
            if state.status != LoopStatus::Idle {
                return false;
            }
            state.status = LoopStatus::Running;
            state.started_at = Some(Utc::now());
            true
        });
        if !proceed {
            return;
        }

        info!(agent = %self.agent_id, wallet = %self.wallet_pk, "agent loop starting");
        self.emit(
            EventKind::AgentStart,
            None,
            None,
            json!({ "intervalMs": self.interval.as_millis() as u64 }),
        );

        while !self.stop.load(Ordering::SeqCst) {
            if let TickFlow::RemoteStop = self.tick().await {
                return;
            }
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(self.interval).await;
        }

        self.lock_state(|state| state.status = LoopStatus::Stopped);
        info!(agent = %self.agent_id, "agent loop stopped");
        self.emit(
            EventKind::AgentStop,
            None,
            None,
            json!({ "reason": "stop requested" }),
        );
    }

    async fn tick(&self) -> TickFlow {
        let (tick_count, started_at, last_action_at) = self.lock_state(|state| {
            state.tick_count += 1;
            state.last_tick_at = Some(Utc::now());
            (state.tick_count, state.started_at, state.last_action_at)
        });

        if self.remote_stop_requested(started_at) {
            self.stop.store(true, Ordering::SeqCst);
            self.lock_state(|state| state.status = LoopStatus::Stopped);
            info!(agent = %self.agent_id, "remote stop signal observed");
            self.emit(
                EventKind::AgentStop,
                None,
                None,
                json!({ "reason": REMOTE_STOP_REASON }),
            );
            return TickFlow::RemoteStop;
        }

        if let Err(e) = self.run_tick_inner(tick_count, last_action_at).await {
            let kind = if e.code() == "LIMIT_BREACH" {
                EventKind::LimitBreach
            } else {
                EventKind::AgentError
            };
            error!(agent = %self.agent_id, tick = tick_count, error = %e, "tick failed");
            self.lock_state(|state| state.last_error = Some(e.to_string()));
            self.emit(
                kind,
                None,
                None,
                json!({ "tick": tick_count, "code": e.code(), "error": e.to_string() }),
            );
        }
        TickFlow::Continue
    }

    /// The fallible part of a tick: gather, decide, execute, record.
    async fn run_tick_inner(
        &self,
        tick_count: u64,
        last_action_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let sol_balance = self.wallet.get_sol_balance().await?;

        let mut strategy = self.strategy.lock().await;

        let mints = strategy.tracked_mints();
        let reads = mints.into_iter().map(|mint| {
            let wallet = self.wallet.clone();
            async move { (mint, wallet.get_token_balance(&mint).await) }
        });
        let mut token_balances = HashMap::new();
        for (mint, read) in futures::future::join_all(reads).await {
            match read {
                Ok(balance) => token_balances.insert(mint, balance),
                Err(e) => {
                    warn!(agent = %self.agent_id, %mint, error = %e, "token balance read failed; treating as zero");
                    token_balances.insert(mint, 0)
                }
            };
        }

        let snapshot = AgentSnapshot {
            sol_balance,
            token_balances,
            tick_count,
            last_action_at,
        };

        let action = strategy.decide(&snapshot).await?;
        if let Action::Noop { rationale } = &action {
            self.emit(
                EventKind::AgentNoop,
                None,
                None,
                json!({ "rationale": rationale, "solBalance": sol_balance.to_string() }),
            );
            return Ok(());
        }

        self.emit(
            EventKind::TxAttempt,
            None,
            None,
            json!({
                "action": action.kind(),
                "params": action.params_json(),
                "rationale": action.rationale(),
            }),
        );

        let result = strategy.execute(&action, &self.wallet, &self.registry).await?;
        self.lock_state(|state| state.last_action_at = Some(Utc::now()));

        let (kind, signature, status) = match &result {
            None => (EventKind::AgentAction, None, None),
            Some(tx) => {
                let kind = match tx.status {
                    TxStatus::Confirmed => EventKind::TxConfirmed,
                    TxStatus::Timeout => EventKind::TxTimeout,
                    TxStatus::Failed | TxStatus::Simulated => EventKind::TxFailed,
                };
                (kind, tx.signature.clone(), Some(tx.status.as_str()))
            }
        };
        self.emit(
            kind,
            signature.as_deref(),
            status,
            json!({
                "action": action.kind(),
                "params": action.params_json(),
                "rationale": action.rationale(),
            }),
        );
        Ok(())
    }

    /// A `system_stop_request` row newer than `started_at − 2s` halts the
    /// loop; anything older is a stale signal for a previous incarnation.
    fn remote_stop_requested(&self, started_at: Option<DateTime<Utc>>) -> bool {
        let Some(started_at) = started_at else {
            return false;
        };
        let signal_ts = match self.audit.latest_stop_request(&self.agent_id) {
            Ok(Some(ts)) => ts,
            Ok(None) => return false,
            Err(e) => {
                warn!(agent = %self.agent_id, error = %e, "remote stop check failed");
                return false;
            }
        };
        match DateTime::parse_from_rfc3339(&signal_ts) {
            Ok(signal) => {
                let threshold = started_at - chrono::Duration::seconds(REMOTE_STOP_BUFFER_SECS);
                signal.with_timezone(&Utc) > threshold
            }
            Err(e) => {
                warn!(agent = %self.agent_id, ts = %signal_ts, error = %e, "unparseable stop signal timestamp");
                false
            }
        }
    }

    fn emit(&self, kind: EventKind, signature: Option<&str>, status: Option<&str>, details: serde_json::Value) {
        if let Err(e) = self.audit.insert(
            &self.agent_id,
            kind,
            &self.wallet_pk,
            signature,
            status,
            &details,
        ) {
            warn!(agent = %self.agent_id, event = kind.as_str(), error = %e, "audit insert failed");
        }
    }

    fn lock_state<T>(&self, f: impl FnOnce(&mut AgentLoopState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EventQuery;
    use crate::chain::Commitment;
    use crate::keystore::SigningIdentity;
    use crate::test_support::MockChain;
    use crate::wallet::{SendConfig, SpendingLimits, WalletConfig};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::OnceLock;

    /// Scripted strategy: optionally errors on one tick, and flips the
    /// loop's stop flag once `stop_after` ticks have been decided. The flag
    /// is wired in after loop construction through the shared cell.
    struct ScriptedStrategy {
        error_on_tick: Option<u64>,
        stop_after: u64,
        stop_flag: Arc<OnceLock<Arc<AtomicBool>>>,
    }

    impl ScriptedStrategy {
        fn new(error_on_tick: Option<u64>, stop_after: u64) -> (Self, Arc<OnceLock<Arc<AtomicBool>>>) {
            let cell = Arc::new(OnceLock::new());
            let strategy = Self {
                error_on_tick,
                stop_after,
                stop_flag: cell.clone(),
            };
            (strategy, cell)
        }
    }

    #[async_trait]
    impl Strategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn decide(&mut self, snapshot: &AgentSnapshot) -> Result<Action> {
            if snapshot.tick_count >= self.stop_after {
                if let Some(flag) = self.stop_flag.get() {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            if self.error_on_tick == Some(snapshot.tick_count) {
                return Err(Error::SwapFailed(format!(
                    "Strategy exploded on tick {}",
                    snapshot.tick_count
                )));
            }
            Ok(Action::noop("scripted idle"))
        }
    }

    fn test_wallet(chain: Arc<MockChain>) -> Arc<WalletClient> {
        let limits = SpendingLimits::new(100_000_000, 500_000_000, None).unwrap();
        let config = WalletConfig {
            rpc_url: crate::config::DEVNET_RPC_URL.to_string(),
            send: SendConfig {
                retry_delay_ms: 1,
                confirm_poll_ms: 1,
                confirm_timeout_ms: 40,
                commitment: Commitment::Confirmed,
                ..SendConfig::default()
            },
            priority_fee_microlamports: 0,
        };
        Arc::new(WalletClient::new(SigningIdentity::generate(), limits, config, chain).unwrap())
    }

    /// Build a loop around a scripted strategy with its stop cell armed.
    fn scripted_loop(
        agent_id: &str,
        error_on_tick: Option<u64>,
        stop_after: u64,
        audit: Arc<AuditDb>,
    ) -> Arc<AgentLoop> {
        let (strategy, cell) = ScriptedStrategy::new(error_on_tick, stop_after);
        let chain = Arc::new(MockChain::new());
        let agent_loop = Arc::new(AgentLoop::new(
            agent_id,
            2,
            test_wallet(chain),
            Box::new(strategy),
            Arc::new(SwapRegistry::new(vec![])),
            audit,
        ));
        cell.set(agent_loop.stop_handle()).ok();
        agent_loop
    }

    #[tokio::test]
    async fn crashed_tick_does_not_kill_the_loop() {
        let audit = Arc::new(AuditDb::open_in_memory().unwrap());
        let agent_loop = scripted_loop("agent-crash", Some(1), 2, audit.clone());

        agent_loop.start().await;

        let state = agent_loop.state();
        assert_eq!(state.tick_count, 2);
        assert_eq!(state.status, LoopStatus::Stopped);
        assert!(state
            .last_error
            .as_deref()
            .unwrap()
            .contains("Strategy exploded on tick 1"));

        let errors = audit
            .query(&EventQuery {
                agent_id: Some("agent-crash"),
                event: Some(EventKind::AgentError),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].details["error"]
            .as_str()
            .unwrap()
            .contains("Strategy exploded on tick 1"));
    }

    #[tokio::test]
    async fn remote_stop_signal_halts_the_loop() {
        let audit = Arc::new(AuditDb::open_in_memory().unwrap());
        audit
            .insert(
                "agent-A",
                EventKind::SystemStopRequest,
                "operator",
                None,
                None,
                &json!({ "requestedBy": "cli" }),
            )
            .unwrap();

        let agent_loop = scripted_loop("agent-A", None, u64::MAX, audit.clone());

        // The signal predates start but falls inside the 2s buffer, so the
        // first tick observes it and the loop exits on its own.
        agent_loop.start().await;

        let state = agent_loop.state();
        assert_eq!(state.status, LoopStatus::Stopped);
        assert_eq!(state.tick_count, 1);

        let stops = audit
            .query(&EventQuery {
                agent_id: Some("agent-A"),
                event: Some(EventKind::AgentStop),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].details["reason"], REMOTE_STOP_REASON);
    }

    #[tokio::test]
    async fn stale_stop_signal_is_ignored() {
        let audit = Arc::new(AuditDb::open_in_memory().unwrap());
        audit
            .insert_at(
                "2020-01-01T00:00:00.000Z",
                "agent-B",
                EventKind::SystemStopRequest,
                "operator",
                &json!({}),
            )
            .unwrap();

        let agent_loop = scripted_loop("agent-B", None, 1, audit.clone());
        agent_loop.start().await;

        let state = agent_loop.state();
        assert_eq!(state.status, LoopStatus::Stopped);
        assert_eq!(state.tick_count, 1);
        let stops = audit
            .query(&EventQuery {
                agent_id: Some("agent-B"),
                event: Some(EventKind::AgentStop),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(stops[0].details["reason"], "stop requested");
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stopped_is_terminal() {
        let audit = Arc::new(AuditDb::open_in_memory().unwrap());
        let agent_loop = scripted_loop("agent-C", None, 3, audit.clone());

        agent_loop.start().await;
        let ticks = agent_loop.state().tick_count;
        assert_eq!(agent_loop.state().status, LoopStatus::Stopped);

        // A second start must return immediately without reviving the loop.
        agent_loop.start().await;
        assert_eq!(agent_loop.state().tick_count, ticks);
        assert_eq!(agent_loop.state().status, LoopStatus::Stopped);
    }

    /// Records the tracked-mint balance each decide sees, then stops.
    struct MintWatcher {
        mint: solana_sdk::pubkey::Pubkey,
        seen: Arc<std::sync::Mutex<Option<u64>>>,
        stop_flag: Arc<OnceLock<Arc<AtomicBool>>>,
    }

    #[async_trait]
    impl Strategy for MintWatcher {
        fn name(&self) -> &'static str {
            "mint-watcher"
        }

        async fn decide(&mut self, snapshot: &AgentSnapshot) -> Result<Action> {
            *self.seen.lock().unwrap() = snapshot.token_balances.get(&self.mint).copied();
            if let Some(flag) = self.stop_flag.get() {
                flag.store(true, Ordering::SeqCst);
            }
            Ok(Action::noop("watching"))
        }

        fn tracked_mints(&self) -> Vec<solana_sdk::pubkey::Pubkey> {
            vec![self.mint]
        }
    }

    #[tokio::test]
    async fn failed_token_read_degrades_to_zero() {
        use spl_associated_token_account::get_associated_token_address;

        let audit = Arc::new(AuditDb::open_in_memory().unwrap());
        let chain = Arc::new(MockChain::new());
        let wallet = test_wallet(chain.clone());
        let mint = solana_sdk::pubkey::Pubkey::new_unique();
        let ata = get_associated_token_address(&wallet.public_key(), &mint);
        chain.fail_token_account(ata);

        let seen = Arc::new(std::sync::Mutex::new(None));
        let cell = Arc::new(OnceLock::new());
        let strategy = MintWatcher {
            mint,
            seen: seen.clone(),
            stop_flag: cell.clone(),
        };
        let agent_loop = Arc::new(AgentLoop::new(
            "agent-degrade",
            2,
            wallet,
            Box::new(strategy),
            Arc::new(SwapRegistry::new(vec![])),
            audit,
        ));
        cell.set(agent_loop.stop_handle()).ok();

        agent_loop.start().await;

        // The failing read degraded to zero instead of crashing the tick.
        assert_eq!(*seen.lock().unwrap(), Some(0));
        assert_eq!(agent_loop.state().status, LoopStatus::Stopped);
        assert!(agent_loop.state().last_error.is_none());
    }

    #[tokio::test]
    async fn three_loops_are_isolated() {
        let audit = Arc::new(AuditDb::open_in_memory().unwrap());
        let mut loops = Vec::new();
        for name in ["iso-1", "iso-2", "iso-3"] {
            loops.push(scripted_loop(name, None, 5, audit.clone()));
        }

        let tasks: Vec<_> = loops
            .iter()
            .map(|l| {
                let l = l.clone();
                tokio::spawn(async move { l.start().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut wallet_pks = Vec::new();
        for agent_loop in &loops {
            let state = agent_loop.state();
            assert_eq!(state.tick_count, 5);
            assert_eq!(state.status, LoopStatus::Stopped);
            wallet_pks.push(agent_loop.wallet_pk.clone());
        }

        // Every row belongs to exactly the wallet of its loop, and no row
        // carries key-adjacent material.
        for (agent_loop, wallet_pk) in loops.iter().zip(&wallet_pks) {
            let rows = audit
                .query(&EventQuery {
                    agent_id: Some(agent_loop.agent_id()),
                    limit: 100,
                    ..Default::default()
                })
                .unwrap();
            assert!(!rows.is_empty());
            for row in rows {
                assert_eq!(&row.wallet_pk, wallet_pk);
                let details = serde_json::to_string(&row.details).unwrap();
                crate::audit::sanitize::assert_no_key_material(&details).unwrap();
            }
        }
    }
}
