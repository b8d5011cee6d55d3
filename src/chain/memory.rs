//! In-memory recurring-transactions contract.
//!
//! Mirrors the contract surface the job core uses (`jobsForAddress`, `jobs`,
//! `removeJob`) with hooks for injecting faults and latency.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256, address};
use async_trait::async_trait;

use super::contract::{ContractCall, encode_job, encode_job_id};
use super::{ContractGateway, TxHandle, TxReceipt};
use crate::error::GatewayError;
use crate::jobs::model::{JobId, JobRecord};

/// Token used for jobs created through [`MemoryChain::create_job`].
pub const DEFAULT_TOKEN: Address = address!("0xcB444e90D8198415266c6a2724b7900fb12FC56E");

const RECIPIENT: Address = address!("0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC");

#[derive(Default)]
struct ChainState {
    next_id: u64,
    jobs: BTreeMap<JobId, JobRecord>,
    owners: HashMap<Address, Vec<JobId>>,
    raw_overrides: HashMap<JobId, Bytes>,
    index_faults: HashMap<(Address, U256), GatewayError>,
    index_delays: HashMap<(Address, U256), Duration>,
    fetch_faults: HashMap<JobId, GatewayError>,
    write_fault: Option<GatewayError>,
    write_delay: Option<Duration>,
    /// Receipts never arrive; `confirm` gives up after this long.
    withheld_receipts: Option<Duration>,
    revert_on_confirm: HashSet<JobId>,
    receipts: HashMap<B256, (JobId, bool)>,
    tx_counter: u64,
}

/// In-memory contract gateway.
#[derive(Default)]
pub struct MemoryChain {
    state: Mutex<ChainState>,
    writes: AtomicUsize,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Register a new active job for `owner` and return its id.
    pub fn create_job(&self, owner: Address, period: u64, executions: u64, amount: U256) -> JobId {
        self.with_state(|s| {
            let id = U256::from(s.next_id);
            s.next_id += 1;
            s.jobs.insert(
                id,
                JobRecord {
                    id,
                    period,
                    remaining_executions: executions,
                    amount,
                    last_execution_timestamp: 0,
                    sender: owner,
                    recipient: RECIPIENT,
                    token: DEFAULT_TOKEN,
                },
            );
            s.owners.entry(owner).or_default().push(id);
            id
        })
    }

    /// Simulate executions having run.
    pub fn set_remaining(&self, id: JobId, remaining: u64, last_execution_timestamp: u64) {
        self.with_state(|s| {
            if let Some(job) = s.jobs.get_mut(&id) {
                job.remaining_executions = remaining;
                job.last_execution_timestamp = last_execution_timestamp;
            }
        });
    }

    pub fn record(&self, id: JobId) -> Option<JobRecord> {
        self.with_state(|s| s.jobs.get(&id).cloned())
    }

    pub fn owner_job_ids(&self, owner: Address) -> Vec<JobId> {
        self.with_state(|s| s.owners.get(&owner).cloned().unwrap_or_default())
    }

    /// Return `data` verbatim for `jobs(id)`.
    pub fn override_record_data(&self, id: JobId, data: Bytes) {
        self.with_state(|s| s.raw_overrides.insert(id, data));
    }

    pub fn fail_index(&self, owner: Address, index: u64, error: GatewayError) {
        self.with_state(|s| s.index_faults.insert((owner, U256::from(index)), error));
    }

    pub fn delay_index(&self, owner: Address, index: u64, delay: Duration) {
        self.with_state(|s| s.index_delays.insert((owner, U256::from(index)), delay));
    }

    pub fn fail_fetch(&self, id: JobId, error: GatewayError) {
        self.with_state(|s| s.fetch_faults.insert(id, error));
    }

    pub fn clear_faults(&self) {
        self.with_state(|s| {
            s.index_faults.clear();
            s.fetch_faults.clear();
            s.write_fault = None;
            s.withheld_receipts = None;
        });
    }

    /// Reject every write with `error` until cleared.
    pub fn fail_writes(&self, error: GatewayError) {
        self.with_state(|s| s.write_fault = Some(error));
    }

    pub fn delay_writes(&self, delay: Duration) {
        self.with_state(|s| s.write_delay = Some(delay));
    }

    /// Accept writes but never produce a receipt; `confirm` times out after
    /// `timeout`.
    pub fn withhold_receipts(&self, timeout: Duration) {
        self.with_state(|s| s.withheld_receipts = Some(timeout));
    }

    /// Accept the `removeJob(id)` transaction but settle it as reverted.
    pub fn revert_on_confirm(&self, id: JobId) {
        self.with_state(|s| s.revert_on_confirm.insert(id));
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn read_now(&self, call: &ContractCall) -> Result<Bytes, GatewayError> {
        self.with_state(|s| match call {
            ContractCall::jobsForAddress(c) => {
                if let Some(err) = s.index_faults.get(&(c.owner, c.index)) {
                    return Err(err.clone());
                }
                s.owners
                    .get(&c.owner)
                    .and_then(|ids| usize::try_from(c.index).ok().and_then(|i| ids.get(i)))
                    .map(|id| encode_job_id(*id))
                    .ok_or_else(|| GatewayError::Reverted {
                        reason: "index out of range".into(),
                    })
            }
            ContractCall::jobs(c) => {
                if let Some(err) = s.fetch_faults.get(&c.id) {
                    return Err(err.clone());
                }
                if let Some(data) = s.raw_overrides.get(&c.id) {
                    return Ok(data.clone());
                }
                // Unknown ids read as the zero struct, like a Solidity mapping.
                Ok(match s.jobs.get(&c.id) {
                    Some(record) => encode_record(record),
                    None => encode_job(Default::default()),
                })
            }
            ContractCall::removeJob(_) => Err(GatewayError::Rpc {
                code: -32601,
                message: "removeJob is not a view function".into(),
            }),
        })
    }

    fn write_now(&self, call: &ContractCall) -> Result<TxHandle, GatewayError> {
        self.with_state(|s| {
            if let Some(err) = &s.write_fault {
                return Err(err.clone());
            }
            let ContractCall::removeJob(c) = call else {
                return Err(GatewayError::Rpc {
                    code: -32601,
                    message: "only removeJob is writable".into(),
                });
            };

            let job = s.jobs.get_mut(&c.id).ok_or_else(|| GatewayError::Reverted {
                reason: "job does not exist".into(),
            })?;
            if job.token.is_zero() || job.remaining_executions == 0 {
                return Err(GatewayError::Reverted {
                    reason: "job is not active".into(),
                });
            }

            s.tx_counter += 1;
            let hash = B256::from(U256::from(s.tx_counter));
            let success = !s.revert_on_confirm.contains(&c.id);
            s.receipts.insert(hash, (c.id, success));
            Ok(TxHandle { hash })
        })
    }
}

#[async_trait]
impl ContractGateway for MemoryChain {
    async fn read(&self, _contract: Address, call: &ContractCall) -> Result<Bytes, GatewayError> {
        let delay = match call {
            ContractCall::jobsForAddress(c) => {
                self.with_state(|s| s.index_delays.get(&(c.owner, c.index)).copied())
            }
            _ => None,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.read_now(call)
    }

    async fn write(&self, _contract: Address, call: &ContractCall) -> Result<TxHandle, GatewayError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.write_now(call)
    }

    async fn confirm(&self, tx: &TxHandle) -> Result<TxReceipt, GatewayError> {
        if let Some(delay) = self.with_state(|s| s.write_delay) {
            tokio::time::sleep(delay).await;
        }
        if let Some(timeout) = self.with_state(|s| s.withheld_receipts) {
            tokio::time::sleep(timeout).await;
            return Err(GatewayError::Timeout(timeout));
        }

        self.with_state(|s| {
            let (id, success) = *s
                .receipts
                .get(&tx.hash)
                .ok_or_else(|| GatewayError::InvalidResponse(format!("unknown tx {}", tx.hash)))?;
            // The contract zeroes the token instead of erasing the record.
            if success {
                if let Some(job) = s.jobs.get_mut(&id) {
                    job.token = Address::ZERO;
                }
            }
            Ok(TxReceipt {
                hash: tx.hash,
                success,
                block_number: Some(s.tx_counter),
            })
        })
    }
}

/// Encode a record as the `jobs(uint256)` return tuple.
pub fn encode_record(record: &JobRecord) -> Bytes {
    encode_job((
        U256::from(record.period),
        U256::from(record.remaining_executions),
        record.amount,
        U256::from(record.last_execution_timestamp),
        record.sender,
        record.recipient,
        record.token,
    ))
}
