//! Job board: the discovered job list for the connected owner, with
//! per-row cancel state and broadcast to UI subscribers.
//!
//! Every discovery run is tagged with a sequence number from
//! [`JobBoard::begin_run`]. Only the result of the latest run is applied;
//! anything older is dropped.
//!
//! In-flight cancellations and their last outcomes are keyed by job id, not
//! by row, so they survive a list rebuild.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use super::cancel::CancelAck;
use super::model::{
    CancelOutcome, JobId, JobRecord, JobView, as_checksum, as_checksum_opt, as_decimal,
};
use crate::error::{CancellationError, DiscoveryError};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Identifies one discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunTicket {
    pub seq: u64,
    #[serde(serialize_with = "as_checksum")]
    pub owner: Address,
}

/// Point-in-time view of the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardSnapshot {
    #[serde(serialize_with = "as_checksum_opt")]
    pub owner: Option<Address>,
    pub loading: bool,
    pub error: Option<String>,
    pub jobs: Vec<JobView>,
}

/// Events pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoardEvent {
    /// Full state; sent on connect and after every applied run.
    JobsSync {
        #[serde(flatten)]
        snapshot: BoardSnapshot,
    },
    Loading {
        #[serde(serialize_with = "as_checksum")]
        owner: Address,
    },
    DiscoveryFailed {
        #[serde(serialize_with = "as_checksum")]
        owner: Address,
        message: String,
    },
    CancelPending {
        #[serde(serialize_with = "as_decimal")]
        id: JobId,
    },
    CancelConfirmed {
        #[serde(serialize_with = "as_decimal")]
        id: JobId,
        tx_hash: B256,
    },
    CancelFailed {
        #[serde(serialize_with = "as_decimal")]
        id: JobId,
        message: String,
    },
}

#[derive(Debug, Default)]
struct BoardState {
    seq: u64,
    owner: Option<Address>,
    loading: bool,
    error: Option<String>,
    jobs: Vec<JobView>,
    /// Ids with a `removeJob` in flight.
    pending: HashSet<JobId>,
    outcomes: HashMap<JobId, CancelOutcome>,
}

impl BoardState {
    fn view(&self, record: JobRecord) -> JobView {
        let mut view = JobView::new(record);
        view.cancel_pending = self.pending.contains(&view.id);
        view.last_cancel = self.outcomes.get(&view.id).cloned();
        view
    }

    fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            owner: self.owner,
            loading: self.loading,
            error: self.error.clone(),
            jobs: self.jobs.clone(),
        }
    }
}

/// In-memory job list for one connected owner.
pub struct JobBoard {
    state: RwLock<BoardState>,
    tx: broadcast::Sender<BoardEvent>,
}

impl JobBoard {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            state: RwLock::new(BoardState::default()),
            tx,
        })
    }

    /// Subscribe to board events. Each WS client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.tx.subscribe()
    }

    /// Start a new discovery run for `owner`, clearing the previous list.
    pub async fn begin_run(&self, owner: Address) -> RunTicket {
        let ticket = {
            let mut state = self.state.write().await;
            state.seq += 1;
            state.owner = Some(owner);
            state.loading = true;
            state.error = None;
            state.jobs.clear();
            RunTicket {
                seq: state.seq,
                owner,
            }
        };

        debug!(owner = %owner, seq = ticket.seq, "Discovery run started");
        let _ = self.tx.send(BoardEvent::Loading { owner });
        ticket
    }

    /// Apply the result of a run. Returns false if a newer run has started
    /// since `ticket` was issued, in which case nothing changes.
    pub async fn apply(
        &self,
        ticket: RunTicket,
        result: Result<Vec<JobRecord>, DiscoveryError>,
    ) -> bool {
        let event = {
            let mut state = self.state.write().await;
            if state.seq != ticket.seq {
                debug!(
                    owner = %ticket.owner,
                    seq = ticket.seq,
                    latest = state.seq,
                    "Discarding stale discovery result"
                );
                return false;
            }

            state.loading = false;
            match result {
                Ok(records) => {
                    state.error = None;
                    let jobs: Vec<JobView> =
                        records.into_iter().map(|r| state.view(r)).collect();
                    state.jobs = jobs;
                    info!(owner = %ticket.owner, seq = ticket.seq, count = state.jobs.len(), "Job list published");
                    BoardEvent::JobsSync {
                        snapshot: state.snapshot(),
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(owner = %ticket.owner, seq = ticket.seq, error = %message, "Discovery failed");
                    state.jobs.clear();
                    state.error = Some(message.clone());
                    BoardEvent::DiscoveryFailed {
                        owner: ticket.owner,
                        message,
                    }
                }
            }
        };

        let _ = self.tx.send(event);
        true
    }

    /// Forget the owner and list; any in-flight run becomes stale.
    ///
    /// In-flight cancellations stay registered until they settle.
    pub async fn reset(&self) {
        let snapshot = {
            let mut state = self.state.write().await;
            state.seq += 1;
            state.owner = None;
            state.loading = false;
            state.error = None;
            state.jobs.clear();
            state.outcomes.clear();
            state.snapshot()
        };

        info!("Job board reset");
        let _ = self.tx.send(BoardEvent::JobsSync { snapshot });
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn owner(&self) -> Option<Address> {
        self.state.read().await.owner
    }

    /// Whether `ticket` still belongs to the latest run.
    pub async fn is_current(&self, ticket: RunTicket) -> bool {
        self.state.read().await.seq == ticket.seq
    }

    pub async fn job(&self, id: JobId) -> Option<JobView> {
        let state = self.state.read().await;
        state.jobs.iter().find(|j| j.id == id).cloned()
    }

    /// Mark a row as cancel-pending. Refused for unknown rows, rows that are
    /// not active, and rows with a cancellation already in flight.
    pub async fn begin_cancel(&self, id: JobId) -> Result<JobView, CancellationError> {
        let view = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let job = state
                .jobs
                .iter_mut()
                .find(|j| j.id == id)
                .ok_or(CancellationError::NotFound { id })?;

            if !job.status.is_cancellable() {
                return Err(CancellationError::NotCancellable {
                    id,
                    status: job.status.to_string(),
                });
            }
            if !state.pending.insert(id) {
                return Err(CancellationError::AlreadyPending { id });
            }

            state.outcomes.remove(&id);
            job.cancel_pending = true;
            job.last_cancel = None;
            job.clone()
        };

        info!(job_id = %id, "Cancellation pending");
        let _ = self.tx.send(BoardEvent::CancelPending { id });
        Ok(view)
    }

    /// Clear a row's pending flag and record the outcome on it.
    pub async fn settle_cancel(&self, id: JobId, outcome: &Result<CancelAck, CancellationError>) {
        let last = match outcome {
            Ok(ack) => CancelOutcome::Confirmed {
                tx_hash: ack.tx_hash,
            },
            Err(e) => CancelOutcome::Failed {
                message: e.to_string(),
            },
        };

        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            state.pending.remove(&id);
            match state.jobs.iter_mut().find(|j| j.id == id) {
                Some(job) => {
                    job.cancel_pending = false;
                    job.last_cancel = Some(last.clone());
                }
                None => debug!(job_id = %id, "Settled cancellation for a row no longer listed"),
            }
            state.outcomes.insert(id, last);
        }

        let event = match outcome {
            Ok(ack) => {
                info!(job_id = %id, tx_hash = %ack.tx_hash, "Cancellation confirmed");
                BoardEvent::CancelConfirmed {
                    id,
                    tx_hash: ack.tx_hash,
                }
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "Cancellation failed");
                BoardEvent::CancelFailed {
                    id,
                    message: e.to_string(),
                }
            }
        };
        let _ = self.tx.send(event);
    }
}
