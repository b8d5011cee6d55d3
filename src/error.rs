//! Error types for recurring-jobs.

use std::time::Duration;

use alloy_primitives::{B256, U256};

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by a contract gateway (JSON-RPC node, wallet, test double).
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The contract call executed and reverted.
    #[error("Execution reverted: {reason}")]
    Reverted { reason: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("No sending account configured for writes")]
    NoSender,
}

impl GatewayError {
    /// Whether the failure came from the contract reverting, as opposed to
    /// the call never reaching it.
    pub fn is_revert(&self) -> bool {
        matches!(self, Self::Reverted { .. })
    }
}

/// Errors decoding contract return data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed return data: {0}")]
    Abi(String),

    #[error("Field {field} does not fit in 64 bits")]
    Overflow { field: &'static str },

    #[error("Field {field} must be positive")]
    NotPositive { field: &'static str },
}

/// Job discovery errors. Any of these aborts the whole run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Reading index {index} failed: {source}")]
    Index {
        index: u64,
        #[source]
        source: GatewayError,
    },

    #[error("Fetching job {id} failed: {reason}")]
    Fetch { id: U256, reason: String },

    #[error("Owner has more than {max} jobs; discovery stopped")]
    JobLimitExceeded { max: u64 },
}

/// Job cancellation errors, scoped to one job.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CancellationError {
    #[error("Job {id} not found")]
    NotFound { id: U256 },

    #[error("Job {id} is {status} and cannot be cancelled")]
    NotCancellable { id: U256, status: String },

    #[error("Job {id} already has a cancellation in flight")]
    AlreadyPending { id: U256 },

    #[error("Cancellation of job {id} was rejected: {reason}")]
    Rejected { id: U256, reason: String },

    #[error("Cancellation of job {id} reverted in transaction {tx_hash}")]
    Reverted { id: U256, tx_hash: B256 },

    #[error("Cancellation of job {id} was never confirmed: {reason}")]
    Unconfirmed { id: U256, reason: String },
}

/// Tracker-level errors (trigger preconditions).
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackerError {
    #[error("No owner address connected")]
    NotConnected,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
