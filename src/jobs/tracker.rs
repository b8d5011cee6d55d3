//! Job tracker: turns UI triggers (owner connected or changed, refresh,
//! cancel) into discovery runs and cancellations against the board.

use std::sync::Arc;

use alloy_primitives::Address;
use tracing::{debug, info};

use super::board::{JobBoard, RunTicket};
use super::cancel::{CancelAck, CancellationController};
use super::discovery::JobDiscovery;
use super::model::{JobId, JobView};
use crate::error::{CancellationError, TrackerError};

/// Tracker configuration.
#[derive(Debug, Clone, Default)]
pub struct TrackerConfig {
    /// Re-run discovery after a confirmed cancellation.
    pub refresh_after_cancel: bool,
}

/// Coordinates discovery and cancellation for the connected owner.
pub struct JobTracker {
    board: Arc<JobBoard>,
    discovery: Arc<JobDiscovery>,
    canceller: Arc<CancellationController>,
    config: TrackerConfig,
}

impl JobTracker {
    pub fn new(
        board: Arc<JobBoard>,
        discovery: Arc<JobDiscovery>,
        canceller: Arc<CancellationController>,
        config: TrackerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            board,
            discovery,
            canceller,
            config,
        })
    }

    pub fn board(&self) -> &Arc<JobBoard> {
        &self.board
    }

    /// Owner connected or changed: start a fresh run in the background.
    ///
    /// The run is registered on the board before this returns, so a later
    /// trigger always supersedes it.
    pub async fn connect(self: &Arc<Self>, owner: Address) -> RunTicket {
        let ticket = self.board.begin_run(owner).await;
        info!(owner = %owner, seq = ticket.seq, "Owner connected, discovering jobs");

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.finish_run(ticket).await;
        });
        ticket
    }

    /// Re-run discovery for the current owner.
    pub async fn refresh(self: &Arc<Self>) -> Result<RunTicket, TrackerError> {
        let owner = self.board.owner().await.ok_or(TrackerError::NotConnected)?;
        Ok(self.connect(owner).await)
    }

    /// Owner disconnected.
    pub async fn disconnect(&self) {
        self.board.reset().await;
    }

    /// Run discovery for `owner` to completion. Returns whether the result
    /// was applied (false if a newer run superseded it).
    pub async fn run_discovery(&self, owner: Address) -> bool {
        let ticket = self.board.begin_run(owner).await;
        self.finish_run(ticket).await
    }

    async fn finish_run(&self, ticket: RunTicket) -> bool {
        let result = self.discovery.discover_jobs(ticket.owner).await;
        self.board.apply(ticket, result).await
    }

    /// Start cancelling job `id`. Returns the row with its pending flag set;
    /// settlement happens in the background and is broadcast by the board.
    pub async fn cancel(self: &Arc<Self>, id: JobId) -> Result<JobView, CancellationError> {
        let view = self.board.begin_cancel(id).await?;

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let confirmed = tracker.settle(id).await.is_ok();
            if confirmed && tracker.config.refresh_after_cancel {
                if let Err(e) = tracker.refresh().await {
                    debug!(job_id = %id, error = %e, "Skipping refresh after cancellation");
                }
            }
        });
        Ok(view)
    }

    async fn settle(&self, id: JobId) -> Result<CancelAck, CancellationError> {
        let outcome = self.canceller.cancel(id).await;
        self.board.settle_cancel(id, &outcome).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::{U256, address};
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    use super::*;
    use crate::chain::memory::MemoryChain;
    use crate::config::DiscoveryConfig;
    use crate::error::GatewayError;
    use crate::jobs::board::BoardEvent;
    use crate::jobs::model::{CancelOutcome, JobStatus};

    const OWNER_A: Address = address!("0x70997970C51812dc3A010C7d01b50e0d17dc79C8");
    const OWNER_B: Address = address!("0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC");
    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn tracker(chain: &Arc<MemoryChain>, refresh_after_cancel: bool) -> Arc<JobTracker> {
        let discovery = Arc::new(JobDiscovery::new(
            chain.clone(),
            Address::ZERO,
            DiscoveryConfig::default(),
        ));
        let canceller = Arc::new(CancellationController::new(chain.clone(), Address::ZERO));
        JobTracker::new(
            JobBoard::new(),
            discovery,
            canceller,
            TrackerConfig {
                refresh_after_cancel,
            },
        )
    }

    /// Wait for the first event matching `pred`.
    async fn wait_for<F>(rx: &mut broadcast::Receiver<BoardEvent>, pred: F) -> BoardEvent
    where
        F: Fn(&BoardEvent) -> bool,
    {
        timeout(TEST_TIMEOUT, async {
            loop {
                let event = rx.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for board event")
    }

    #[tokio::test]
    async fn connect_publishes_jobs() {
        let chain = Arc::new(MemoryChain::new());
        chain.create_job(OWNER_A, 60, 2, U256::from(1u64));
        chain.create_job(OWNER_A, 60, 2, U256::from(1u64));
        let tracker = tracker(&chain, false);
        let mut rx = tracker.board().subscribe();

        tracker.connect(OWNER_A).await;
        wait_for(&mut rx, |e| matches!(e, BoardEvent::JobsSync { .. })).await;

        let snap = tracker.board().snapshot().await;
        assert_eq!(snap.jobs.len(), 2);
        assert!(!snap.loading);
    }

    #[tokio::test]
    async fn newer_owner_supersedes_slow_run() {
        let chain = Arc::new(MemoryChain::new());
        chain.create_job(OWNER_A, 60, 2, U256::from(1u64));
        chain.create_job(OWNER_B, 60, 2, U256::from(2u64));
        chain.delay_index(OWNER_A, 0, Duration::from_millis(200));
        let tracker = tracker(&chain, false);

        let slow = tracker.connect(OWNER_A).await;
        assert!(tracker.run_discovery(OWNER_B).await);

        // Let A's run finish; its result must be discarded.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!tracker.board().is_current(slow).await);

        let snap = tracker.board().snapshot().await;
        assert_eq!(snap.owner, Some(OWNER_B));
        assert_eq!(snap.jobs.len(), 1);
        assert_eq!(snap.jobs[0].amount, U256::from(2u64));
    }

    #[tokio::test]
    async fn refresh_without_owner_is_an_error() {
        let chain = Arc::new(MemoryChain::new());
        let tracker = tracker(&chain, false);
        assert!(matches!(tracker.refresh().await, Err(TrackerError::NotConnected)));
    }

    #[tokio::test]
    async fn cancel_sets_pending_then_settles() {
        let chain = Arc::new(MemoryChain::new());
        let id = chain.create_job(OWNER_A, 60, 2, U256::from(1u64));
        chain.delay_writes(Duration::from_millis(100));
        let tracker = tracker(&chain, false);
        assert!(tracker.run_discovery(OWNER_A).await);
        let mut rx = tracker.board().subscribe();

        let view = tracker.cancel(id).await.unwrap();
        assert!(view.cancel_pending);
        assert!(tracker.board().job(id).await.unwrap().cancel_pending);

        let event = wait_for(&mut rx, |e| matches!(e, BoardEvent::CancelConfirmed { .. })).await;
        assert!(matches!(event, BoardEvent::CancelConfirmed { id: got, .. } if got == id));

        // No automatic refresh: the row keeps its stale status.
        let row = tracker.board().job(id).await.unwrap();
        assert!(!row.cancel_pending);
        assert_eq!(row.status, JobStatus::Active);
        assert_eq!(chain.record(id).unwrap().status(), JobStatus::Deleted);
    }

    #[tokio::test]
    async fn refresh_after_cancel_when_enabled() {
        let chain = Arc::new(MemoryChain::new());
        let id = chain.create_job(OWNER_A, 60, 2, U256::from(1u64));
        let tracker = tracker(&chain, true);
        assert!(tracker.run_discovery(OWNER_A).await);
        let mut rx = tracker.board().subscribe();

        tracker.cancel(id).await.unwrap();
        wait_for(&mut rx, |e| matches!(e, BoardEvent::CancelConfirmed { .. })).await;
        wait_for(&mut rx, |e| matches!(e, BoardEvent::JobsSync { .. })).await;

        let row = tracker.board().job(id).await.unwrap();
        assert_eq!(row.status, JobStatus::Deleted);
    }

    #[tokio::test]
    async fn failed_cancel_only_touches_its_row() {
        let chain = Arc::new(MemoryChain::new());
        let ok_id = chain.create_job(OWNER_A, 60, 2, U256::from(1u64));
        let bad_id = chain.create_job(OWNER_A, 60, 2, U256::from(1u64));
        chain.revert_on_confirm(bad_id);
        let tracker = tracker(&chain, false);
        assert!(tracker.run_discovery(OWNER_A).await);

        let mut rx = tracker.board().subscribe();

        tracker.cancel(ok_id).await.unwrap();
        tracker.cancel(bad_id).await.unwrap();
        wait_for(&mut rx, |e| matches!(e, BoardEvent::CancelConfirmed { id, .. } if *id == ok_id)).await;
        wait_for(&mut rx, |e| matches!(e, BoardEvent::CancelFailed { id, .. } if *id == bad_id)).await;

        let snap = tracker.board().snapshot().await;
        assert!(snap.jobs.iter().all(|j| !j.cancel_pending));
        let ok_row = tracker.board().job(ok_id).await.unwrap();
        assert!(matches!(ok_row.last_cancel, Some(CancelOutcome::Confirmed { .. })));
        let bad_row = tracker.board().job(bad_id).await.unwrap();
        assert!(matches!(bad_row.last_cancel, Some(CancelOutcome::Failed { .. })));
    }

    #[tokio::test]
    async fn refresh_does_not_reopen_in_flight_cancel() {
        let chain = Arc::new(MemoryChain::new());
        let id = chain.create_job(OWNER_A, 60, 2, U256::from(1u64));
        chain.delay_writes(Duration::from_millis(150));
        let tracker = tracker(&chain, false);
        assert!(tracker.run_discovery(OWNER_A).await);
        let mut rx = tracker.board().subscribe();

        tracker.cancel(id).await.unwrap();
        assert!(tracker.run_discovery(OWNER_A).await);
        assert!(tracker.board().job(id).await.unwrap().cancel_pending);
        assert!(matches!(
            tracker.cancel(id).await,
            Err(CancellationError::AlreadyPending { .. })
        ));

        wait_for(&mut rx, |e| matches!(e, BoardEvent::CancelConfirmed { .. })).await;
        assert_eq!(chain.write_count(), 1);
        assert!(!tracker.board().job(id).await.unwrap().cancel_pending);
    }

    #[tokio::test]
    async fn missing_receipt_fails_the_row() {
        let chain = Arc::new(MemoryChain::new());
        let id = chain.create_job(OWNER_A, 60, 2, U256::from(1u64));
        chain.withhold_receipts(Duration::from_millis(20));
        let tracker = tracker(&chain, false);
        assert!(tracker.run_discovery(OWNER_A).await);
        let mut rx = tracker.board().subscribe();

        tracker.cancel(id).await.unwrap();
        let event = wait_for(&mut rx, |e| matches!(e, BoardEvent::CancelFailed { .. })).await;
        assert!(matches!(event, BoardEvent::CancelFailed { ref message, .. } if message.contains("no receipt")));

        let row = tracker.board().job(id).await.unwrap();
        assert!(!row.cancel_pending);
        assert!(row.can_cancel());
        match row.last_cancel {
            Some(CancelOutcome::Failed { message }) => assert!(message.contains("no receipt")),
            other => panic!("Expected failed outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completed_job_never_reaches_the_contract() {
        let chain = Arc::new(MemoryChain::new());
        let id = chain.create_job(OWNER_A, 60, 2, U256::from(1u64));
        chain.set_remaining(id, 0, 1_700_000_000);
        let tracker = tracker(&chain, false);
        assert!(tracker.run_discovery(OWNER_A).await);

        assert!(matches!(
            tracker.cancel(id).await,
            Err(CancellationError::NotCancellable { .. })
        ));
        assert_eq!(chain.write_count(), 0);
    }

    #[tokio::test]
    async fn discovery_fault_then_recovery() {
        let chain = Arc::new(MemoryChain::new());
        let id = chain.create_job(OWNER_A, 60, 2, U256::from(1u64));
        chain.fail_fetch(id, GatewayError::Transport("connection reset".into()));
        let tracker = tracker(&chain, false);

        assert!(tracker.run_discovery(OWNER_A).await);
        let snap = tracker.board().snapshot().await;
        assert!(snap.jobs.is_empty());
        assert!(snap.error.is_some());

        chain.clear_faults();
        assert!(tracker.run_discovery(OWNER_A).await);
        let snap = tracker.board().snapshot().await;
        assert_eq!(snap.jobs.len(), 1);
        assert!(snap.error.is_none());
    }
}
