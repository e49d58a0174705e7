//! Error types for the agent wallet runtime

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Wallet errors
    #[error("spending limit breached: {0}")]
    LimitBreach(String),

    #[error("transaction simulation failed: {0}")]
    SimulationFailed(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("invalid keystore: {0}")]
    InvalidKeystore(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("mainnet is blocked: {0}")]
    MainnetBlocked(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Protocol errors
    #[error("quote failed: {0}")]
    QuoteFailed(String),

    #[error("swap failed: {0}")]
    SwapFailed(String),

    #[error("slippage exceeded: {0}")]
    SlippageExceeded(String),

    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("swap adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("price fetch failed: {0}")]
    PriceFetchFailed(String),

    #[error("invalid mint: {0}")]
    InvalidMint(String),

    // Storage errors
    #[error("audit store is closed")]
    ClosedStore,

    #[error("key-adjacent material detected in serialized output: field like `{0}`")]
    KeyMaterialDetected(String),

    #[error("audit store schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("audit store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable code. The agent loop classifies tick failures
    /// by this value, never by the display string.
    pub fn code(&self) -> &'static str {
        match self {
            Error::LimitBreach(_) => "LIMIT_BREACH",
            Error::SimulationFailed(_) => "SIMULATION_FAILED",
            Error::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            Error::Rpc(_) => "RPC_ERROR",
            Error::InvalidKeystore(_) => "INVALID_KEYSTORE",
            Error::SigningFailed(_) => "SIGNING_FAILED",
            Error::MainnetBlocked(_) => "MAINNET_BLOCKED",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::QuoteFailed(_) => "QUOTE_FAILED",
            Error::SwapFailed(_) => "SWAP_FAILED",
            Error::SlippageExceeded(_) => "SLIPPAGE_EXCEEDED",
            Error::PoolNotFound(_) => "POOL_NOT_FOUND",
            Error::AdapterUnavailable(_) => "ADAPTER_UNAVAILABLE",
            Error::PriceFetchFailed(_) => "PRICE_FETCH_FAILED",
            Error::InvalidMint(_) => "INVALID_MINT",
            Error::ClosedStore => "CLOSED_STORE",
            Error::KeyMaterialDetected(_) => "KEY_MATERIAL_DETECTED",
            Error::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Network(_) => "NETWORK_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
