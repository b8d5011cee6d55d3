//! Contract gateway: the read/write seam between the job core and a chain.
//!
//! The core never talks to a node directly. It goes through
//! [`ContractGateway`], which the alloy-backed JSON-RPC client implements for
//! production and [`MemoryChain`] implements for tests.

pub mod contract;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod rpc;

pub use contract::ContractCall;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryChain;
pub use rpc::JsonRpcGateway;

use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Handle to a submitted state-changing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle {
    pub hash: B256,
}

/// Settled outcome of a submitted call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: B256,
    /// Whether the call executed without reverting.
    pub success: bool,
    pub block_number: Option<u64>,
}

/// Read/write access to contract functions.
#[async_trait]
pub trait ContractGateway: Send + Sync {
    /// Execute a read-only call and return its raw ABI-encoded output.
    async fn read(&self, contract: Address, call: &ContractCall) -> Result<Bytes, GatewayError>;

    /// Submit a state-changing call.
    async fn write(&self, contract: Address, call: &ContractCall) -> Result<TxHandle, GatewayError>;

    /// Wait for a submitted call to settle.
    async fn confirm(&self, tx: &TxHandle) -> Result<TxReceipt, GatewayError>;
}
