//! Job discovery: enumerates an owner's jobs by reading
//! `jobsForAddress(owner, index)` until the contract reverts, then fetches
//! each record with `jobs(id)`.
//!
//! The contract has no length accessor, so the end of the list is only
//! observable as a revert. Non-revert failures abort the run.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use super::model::{JobId, JobRecord, IndexOutcome};
use crate::chain::ContractGateway;
use crate::chain::contract::{decode_job_id, job, jobs_for_address};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, GatewayError};

/// Discovers all jobs belonging to an owner.
pub struct JobDiscovery {
    gateway: Arc<dyn ContractGateway>,
    contract: Address,
    config: DiscoveryConfig,
}

impl JobDiscovery {
    pub fn new(gateway: Arc<dyn ContractGateway>, contract: Address, config: DiscoveryConfig) -> Self {
        Self {
            gateway,
            contract,
            config,
        }
    }

    fn concurrency(&self) -> usize {
        self.config.read_concurrency.max(1)
    }

    /// Read one index of the owner's job list.
    pub async fn read_index(&self, owner: Address, index: u64) -> IndexOutcome {
        let call = jobs_for_address(owner, U256::from(index));

        match self.gateway.read(self.contract, &call).await {
            Ok(data) => match decode_job_id(&data) {
                Ok(id) => {
                    debug!(owner = %owner, index, job_id = %id, "Index read found job");
                    IndexOutcome::Found(id)
                }
                Err(e) => {
                    warn!(owner = %owner, index, error = %e, "Index read returned malformed data");
                    IndexOutcome::Fault(DiscoveryError::Index {
                        index,
                        source: GatewayError::InvalidResponse(e.to_string()),
                    })
                }
            },
            Err(e) if e.is_revert() => {
                debug!(owner = %owner, index, reason = %e, "Index read reverted, end of list");
                IndexOutcome::EndOfList
            }
            Err(e) => {
                warn!(owner = %owner, index, error = %e, "Index read failed");
                IndexOutcome::Fault(DiscoveryError::Index { index, source: e })
            }
        }
    }

    /// Collect the owner's job ids in index order.
    ///
    /// Up to `read_concurrency` index reads are in flight at once, but outcomes are
    /// consumed in index order, so the list is always cut at the lowest
    /// failing index even if a later read fails first.
    pub async fn enumerate(&self, owner: Address) -> Result<Vec<JobId>, DiscoveryError> {
        let max = self.config.max_jobs_per_owner;
        let mut reads = std::pin::pin!(
            stream::iter(0..=max)
                .map(|index| self.read_index(owner, index))
                .buffered(self.concurrency())
        );

        let mut ids = Vec::new();
        while let Some(outcome) = reads.next().await {
            match outcome {
                IndexOutcome::Found(id) => {
                    ids.push(id);
                    if ids.len() as u64 > max {
                        break;
                    }
                }
                IndexOutcome::EndOfList => return Ok(ids),
                IndexOutcome::Fault(e) => return Err(e),
            }
        }

        warn!(owner = %owner, max, "Job limit reached without end of list");
        Err(DiscoveryError::JobLimitExceeded { max })
    }

    /// Fetch and decode one job record.
    pub async fn fetch(&self, id: JobId) -> Result<JobRecord, DiscoveryError> {
        let data = self
            .gateway
            .read(self.contract, &job(id))
            .await
            .map_err(|e| DiscoveryError::Fetch {
                id,
                reason: e.to_string(),
            })?;

        JobRecord::decode(id, &data).map_err(|e| DiscoveryError::Fetch {
            id,
            reason: e.to_string(),
        })
    }

    /// Discover every job of `owner`, in index order.
    ///
    /// Either the full list is returned or an error; never a partial list.
    pub async fn discover_jobs(&self, owner: Address) -> Result<Vec<JobRecord>, DiscoveryError> {
        let ids = self.enumerate(owner).await?;
        debug!(owner = %owner, count = ids.len(), "Job ids enumerated");

        let records: Vec<JobRecord> = stream::iter(ids)
            .map(|id| self.fetch(id))
            .buffered(self.concurrency())
            .try_collect()
            .await?;

        info!(owner = %owner, count = records.len(), "Jobs discovered");
        Ok(records)
    }
}
