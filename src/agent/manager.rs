//! Multi-agent supervisor
//!
//! Owns the shared resources (audit store, RPC client, swap registry) and
//! one independent tokio task per agent loop. Every agent gets its own
//! wallet and guard state; a panic or error inside one loop cannot touch
//! another's tick count or liveness. Stop is graceful: flags flip first,
//! tasks drain, then the audit journal is checkpointed and closed.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use crate::agent::{AgentLoop, AgentLoopState};
use crate::audit::AuditDb;
use crate::chain::{ChainClient, SolanaRpc};
use crate::config::{agent_secret_env_var, env_vars, AgentConfig, EnvConfig};
use crate::keystore::{self, SigningIdentity};
use crate::strategy::build_strategy;
use crate::swap::{JupiterAdapter, OrcaAdapter, SwapAdapter, SwapRegistry};
use crate::wallet::{WalletClient, WalletConfig};
use crate::{Error, Result};

/// Optional whirlpool registry file for the orca adapter.
pub const ORCA_POOLS_PATH_ENV: &str = "ORCA_POOLS_PATH";

struct AgentHandle {
    id: String,
    agent_loop: Arc<AgentLoop>,
    task: JoinHandle<()>,
}

pub struct MultiAgentManager {
    configs: Vec<AgentConfig>,
    env: EnvConfig,
    audit: Option<Arc<AuditDb>>,
    handles: Vec<AgentHandle>,
}

impl MultiAgentManager {
    pub fn new(configs: Vec<AgentConfig>, env: EnvConfig) -> Self {
        Self {
            configs,
            env,
            audit: None,
            handles: Vec::new(),
        }
    }

    /// Open shared resources and spawn every configured loop.
    pub async fn start(&mut self) -> Result<()> {
        let audit = Arc::new(AuditDb::open(&self.env.audit_db_path)?);
        let rpc: Arc<dyn ChainClient> = Arc::new(SolanaRpc::new(&self.env.rpc_url)?);
        let registry = Arc::new(default_registry(rpc.clone()));
        self.start_with(rpc, registry, audit)
    }

    /// Shared startup tail; tests inject their own chain and audit store.
    pub(crate) fn start_with(
        &mut self,
        rpc: Arc<dyn ChainClient>,
        registry: Arc<SwapRegistry>,
        audit: Arc<AuditDb>,
    ) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(Error::InvalidConfig("manager is already running".into()));
        }

        for config in &self.configs {
            let identity = self.resolve_identity(config)?;
            let wallet = Arc::new(WalletClient::new(
                identity,
                config.limits.clone(),
                WalletConfig {
                    rpc_url: self.env.rpc_url.clone(),
                    ..WalletConfig::default()
                },
                rpc.clone(),
            )?);
            let strategy = build_strategy(config.strategy, &config.strategy_params)?;

            info!(
                agent = %config.id,
                wallet = %wallet,
                strategy = config.strategy.as_str(),
                interval_ms = config.interval_ms,
                "spawning agent loop"
            );

            let agent_loop = Arc::new(AgentLoop::new(
                config.id.clone(),
                config.interval_ms,
                wallet,
                strategy,
                registry.clone(),
                audit.clone(),
            ));

            let span = tracing::info_span!("agent", id = %config.id);
            let task = {
                let agent_loop = agent_loop.clone();
                tokio::spawn(async move { agent_loop.start().await }.instrument(span))
            };

            self.handles.push(AgentHandle {
                id: config.id.clone(),
                agent_loop,
                task,
            });
        }

        self.audit = Some(audit);
        Ok(())
    }

    /// Secret resolution order: per-agent env var, then the global env var
    /// when exactly one agent runs, then the keystore with the passphrase
    /// from the environment.
    fn resolve_identity(&self, config: &AgentConfig) -> Result<SigningIdentity> {
        let per_agent = agent_secret_env_var(&config.id);
        if let Ok(value) = std::env::var(&per_agent) {
            return keystore::identity_from_env_value(&value, self.env.node_env);
        }

        if self.configs.len() == 1 {
            if let Ok(value) = std::env::var(env_vars::WALLET_SECRET_KEY) {
                return keystore::identity_from_env_value(&value, self.env.node_env);
            }
        }

        let passphrase = self.env.wallet_password.as_deref().ok_or_else(|| {
            Error::InvalidConfig(format!(
                "agent `{}`: no {per_agent} env var and WALLET_PASSWORD is unset",
                config.id
            ))
        })?;
        keystore::open(&config.keystore_path, passphrase)
    }

    /// Flip every stop flag, wait for the in-flight ticks to finish, then
    /// checkpoint and close the audit store.
    pub async fn stop(&mut self) -> Result<()> {
        for handle in &self.handles {
            handle.agent_loop.stop();
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.task.await {
                warn!(agent = %handle.id, error = %e, "agent task did not join cleanly");
            }
        }
        if let Some(audit) = self.audit.take() {
            audit.close()?;
        }
        Ok(())
    }

    pub fn agent_states(&self) -> Vec<(String, AgentLoopState)> {
        self.handles
            .iter()
            .map(|h| (h.id.clone(), h.agent_loop.state()))
            .collect()
    }

    pub fn agent_state(&self, agent_id: &str) -> Option<AgentLoopState> {
        self.handles
            .iter()
            .find(|h| h.id == agent_id)
            .map(|h| h.agent_loop.state())
    }

    pub fn audit_db(&self) -> Option<Arc<AuditDb>> {
        self.audit.clone()
    }
}

fn default_registry(rpc: Arc<dyn ChainClient>) -> SwapRegistry {
    let pools_path = std::env::var(ORCA_POOLS_PATH_ENV).ok().map(PathBuf::from);
    SwapRegistry::new(vec![
        Arc::new(JupiterAdapter::new()) as Arc<dyn SwapAdapter>,
        Arc::new(OrcaAdapter::new(rpc, pools_path.as_deref())),
    ])
}
