//! Job cancellation: submits `removeJob(id)` and waits for it to settle.

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use serde::Serialize;
use tracing::{info, warn};

use super::model::{JobId, as_decimal};
use crate::chain::ContractGateway;
use crate::chain::contract::remove_job;
use crate::error::{CancellationError, GatewayError};

/// Confirmation of a settled cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelAck {
    #[serde(serialize_with = "as_decimal")]
    pub id: JobId,
    pub tx_hash: B256,
}

/// Issues cancellations through the write gateway.
///
/// Holds no per-job state; the one-in-flight-per-row guard lives on the board.
pub struct CancellationController {
    gateway: Arc<dyn ContractGateway>,
    contract: Address,
}

impl CancellationController {
    pub fn new(gateway: Arc<dyn ContractGateway>, contract: Address) -> Self {
        Self { gateway, contract }
    }

    /// Cancel job `id` and wait for the transaction to settle.
    pub async fn cancel(&self, id: JobId) -> Result<CancelAck, CancellationError> {
        let tx = self
            .gateway
            .write(self.contract, &remove_job(id))
            .await
            .map_err(|e| {
                warn!(job_id = %id, error = %e, "removeJob rejected");
                CancellationError::Rejected {
                    id,
                    reason: e.to_string(),
                }
            })?;
        info!(job_id = %id, tx_hash = %tx.hash, "removeJob submitted");

        let receipt = self.gateway.confirm(&tx).await.map_err(|e| {
            let reason = match e {
                GatewayError::Timeout(after) => format!("no receipt after {after:?}"),
                other => other.to_string(),
            };
            CancellationError::Unconfirmed { id, reason }
        })?;

        if !receipt.success {
            warn!(job_id = %id, tx_hash = %receipt.hash, "removeJob reverted");
            return Err(CancellationError::Reverted {
                id,
                tx_hash: receipt.hash,
            });
        }

        Ok(CancelAck {
            id,
            tx_hash: receipt.hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::{U256, address};

    use super::*;
    use crate::chain::memory::MemoryChain;
    use crate::jobs::model::JobStatus;

    const OWNER: Address = address!("0x70997970C51812dc3A010C7d01b50e0d17dc79C8");

    fn setup() -> (Arc<MemoryChain>, CancellationController, JobId) {
        let chain = Arc::new(MemoryChain::new());
        let id = chain.create_job(OWNER, 60, 3, U256::from(5u64));
        let controller = CancellationController::new(chain.clone(), Address::ZERO);
        (chain, controller, id)
    }

    #[tokio::test]
    async fn cancel_active_job() {
        let (chain, controller, id) = setup();
        let ack = controller.cancel(id).await.unwrap();

        assert_eq!(ack.id, id);
        assert_ne!(ack.tx_hash, B256::ZERO);
        assert_eq!(chain.record(id).unwrap().status(), JobStatus::Deleted);
    }

    #[tokio::test]
    async fn rejected_write() {
        let (chain, controller, id) = setup();
        chain.fail_writes(GatewayError::Rpc {
            code: 4001,
            message: "User rejected the request".into(),
        });

        let err = controller.cancel(id).await.unwrap_err();
        assert!(matches!(err, CancellationError::Rejected { .. }));
        assert_eq!(chain.record(id).unwrap().status(), JobStatus::Active);
    }

    #[tokio::test]
    async fn reverted_receipt() {
        let (chain, controller, id) = setup();
        chain.revert_on_confirm(id);

        let err = controller.cancel(id).await.unwrap_err();
        assert!(matches!(err, CancellationError::Reverted { .. }));
        assert_eq!(chain.record(id).unwrap().status(), JobStatus::Active);
    }

    #[tokio::test]
    async fn completed_job_is_rejected_by_contract() {
        let (chain, controller, id) = setup();
        chain.set_remaining(id, 0, 1_700_000_000);

        let err = controller.cancel(id).await.unwrap_err();
        assert!(matches!(err, CancellationError::Rejected { .. }));
    }

    #[tokio::test]
    async fn missing_receipt_is_unconfirmed() {
        let (chain, controller, id) = setup();
        chain.withhold_receipts(Duration::from_millis(20));

        let err = controller.cancel(id).await.unwrap_err();
        match err {
            CancellationError::Unconfirmed { id: got, reason } => {
                assert_eq!(got, id);
                assert!(reason.contains("no receipt"), "{reason}");
            }
            other => panic!("expected Unconfirmed, got {other:?}"),
        }
        assert_eq!(chain.write_count(), 1);
    }
}
