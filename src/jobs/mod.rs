//! Recurring-transfer jobs: discovery, classification, cancellation and the
//! list published to the UI.

pub mod board;
pub mod cancel;
pub mod discovery;
pub mod model;
pub mod tracker;
pub mod ws;

pub use board::{BoardEvent, BoardSnapshot, JobBoard, RunTicket};
pub use cancel::{CancelAck, CancellationController};
pub use discovery::JobDiscovery;
pub use model::{CancelOutcome, IndexOutcome, JobId, JobRecord, JobStatus, JobView, classify};
pub use tracker::{JobTracker, TrackerConfig};
