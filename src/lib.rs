//! Agentic Wallet Runtime
//!
//! Autonomous trading agents for a Solana-style devnet/testnet: strategies
//! run on a tick loop, consult on-chain state, and execute signed
//! transactions through swap adapters while the signing key stays sealed
//! behind a narrow capability object.
//!
//! # Security Model
//!
//! - Signing secrets exist only inside the `WalletClient`; its string,
//!   JSON, and debug forms are the public key and nothing else
//! - Every guarded signing path crosses the `SpendingLimitGuard` before the
//!   signer closure runs
//! - Audit details pass a key-material sanitizer plus a post-serialization
//!   assertion before touching disk
//! - Mainnet RPC hosts are rejected at startup and again at wallet
//!   construction

pub mod agent;
pub mod audit;
pub mod chain;
pub mod config;
pub mod keystore;
pub mod logging;
pub mod strategy;
pub mod swap;
pub mod wallet;

mod error;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use agent::{AgentLoop, AgentLoopState, LoopStatus, MultiAgentManager};
pub use audit::{AuditDb, AuditEvent, EventKind, EventQuery};
pub use chain::{ChainClient, Commitment, SolanaRpc};
pub use config::{AgentConfig, EnvConfig, NodeEnv, SolanaNetwork, StrategyKind};
pub use error::{Error, Result};
pub use keystore::SigningIdentity;
pub use strategy::{Action, AgentSnapshot, Strategy};
pub use swap::{Quote, SwapAdapter, SwapRegistry, SwapResult};
pub use wallet::{
    SendConfig, SpendingLimitGuard, SpendingLimitStatus, SpendingLimits, TxResult, TxStatus,
    WalletClient, WalletConfig,
};
