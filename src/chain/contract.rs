//! Recurring-transactions contract interface and return-data decoding.

use alloy::sol;
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, Bytes, U256};

use crate::error::DecodeError;

sol! {
    /// Contract surface used by the job core.
    interface IRecurringTransactions {
        function jobsForAddress(address owner, uint256 index) external view returns (uint256);
        function jobs(uint256 id) external view returns (
            uint256 period,
            uint256 remainingExecutions,
            uint256 amount,
            uint256 lastExecutionTimestamp,
            address sender,
            address recipient,
            address token
        );
        function removeJob(uint256 id) external;
    }
}

pub use IRecurringTransactions::{
    IRecurringTransactionsCalls as ContractCall, jobsCall, jobsForAddressCall, jobsReturn,
    removeJobCall,
};

/// `jobsForAddress(owner, index)`
pub fn jobs_for_address(owner: Address, index: U256) -> ContractCall {
    ContractCall::jobsForAddress(jobsForAddressCall { owner, index })
}

/// `jobs(id)`
pub fn job(id: U256) -> ContractCall {
    ContractCall::jobs(jobsCall { id })
}

/// `removeJob(id)`
pub fn remove_job(id: U256) -> ContractCall {
    ContractCall::removeJob(removeJobCall { id })
}

/// Canonical signature of a call, for logs and errors.
pub fn signature(call: &ContractCall) -> &'static str {
    match call {
        ContractCall::jobsForAddress(_) => jobsForAddressCall::SIGNATURE,
        ContractCall::jobs(_) => jobsCall::SIGNATURE,
        ContractCall::removeJob(_) => removeJobCall::SIGNATURE,
    }
}

pub fn decode_job_id(data: &[u8]) -> Result<U256, DecodeError> {
    jobsForAddressCall::abi_decode_returns(data).map_err(|e| DecodeError::Abi(e.to_string()))
}

pub fn decode_job(data: &[u8]) -> Result<jobsReturn, DecodeError> {
    jobsCall::abi_decode_returns(data).map_err(|e| DecodeError::Abi(e.to_string()))
}

/// Fields of the `jobs(uint256)` return tuple, in contract order.
pub type JobTuple = (U256, U256, U256, U256, Address, Address, Address);

/// Encode a `jobs(uint256)` return tuple, as a node would return it.
pub fn encode_job(fields: JobTuple) -> Bytes {
    use alloy::sol_types::SolValue;
    Bytes::from(fields.abi_encode_params())
}

/// Encode a `jobsForAddress` return value.
pub fn encode_job_id(id: U256) -> Bytes {
    use alloy::sol_types::SolValue;
    Bytes::from(id.abi_encode())
}
