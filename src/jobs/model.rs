//! Job records, lifecycle status and the UI-facing view.

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::chain::contract::{decode_job, jobsReturn};
use crate::error::{DecodeError, DiscoveryError};

/// Contract-assigned job identifier.
pub type JobId = U256;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job still has executions left.
    Active,
    /// All executions have run.
    Completed,
    /// Job was removed; the contract zeroed its token.
    Deleted,
}

impl JobStatus {
    /// Only active jobs offer cancellation.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// One recurring-transfer job as stored by the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: JobId,
    /// Seconds between executions.
    pub period: u64,
    pub remaining_executions: u64,
    /// Token units per execution.
    pub amount: U256,
    /// Unix seconds.
    pub last_execution_timestamp: u64,
    pub sender: Address,
    pub recipient: Address,
    /// ERC20 token; the zero address marks a deleted job.
    pub token: Address,
}

impl JobRecord {
    /// Decode the output of `jobs(id)`. This is the only place contract
    /// return data becomes a record.
    pub fn decode(id: JobId, data: &[u8]) -> Result<Self, DecodeError> {
        Self::from_return(id, decode_job(data)?)
    }

    /// Validate the `(period, remainingExecutions, amount,
    /// lastExecutionTimestamp, sender, recipient, token)` tuple.
    pub fn from_return(id: JobId, ret: jobsReturn) -> Result<Self, DecodeError> {
        let record = Self {
            id,
            period: to_u64(ret.period, "period")?,
            remaining_executions: to_u64(ret.remainingExecutions, "remaining_executions")?,
            amount: ret.amount,
            last_execution_timestamp: to_u64(ret.lastExecutionTimestamp, "last_execution_timestamp")?,
            sender: ret.sender,
            recipient: ret.recipient,
            token: ret.token,
        };

        // A deleted job may have had its whole struct zeroed.
        if !record.token.is_zero() {
            if record.period == 0 {
                return Err(DecodeError::NotPositive { field: "period" });
            }
            if record.amount.is_zero() {
                return Err(DecodeError::NotPositive { field: "amount" });
            }
        }

        Ok(record)
    }

    pub fn status(&self) -> JobStatus {
        classify(self)
    }
}

fn to_u64(value: U256, field: &'static str) -> Result<u64, DecodeError> {
    u64::try_from(value).map_err(|_| DecodeError::Overflow { field })
}

/// Lifecycle status of a record. Deleted wins over completed.
pub fn classify(record: &JobRecord) -> JobStatus {
    if record.token.is_zero() {
        JobStatus::Deleted
    } else if record.remaining_executions == 0 {
        JobStatus::Completed
    } else {
        JobStatus::Active
    }
}

/// Last settled cancellation of a job, kept on its row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CancelOutcome {
    Confirmed { tx_hash: B256 },
    Failed { message: String },
}

/// UI-facing projection of a job: record, status and local cancel state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobView {
    #[serde(serialize_with = "as_decimal")]
    pub id: JobId,
    #[serde(serialize_with = "as_checksum")]
    pub recipient: Address,
    #[serde(serialize_with = "as_checksum")]
    pub sender: Address,
    #[serde(serialize_with = "as_checksum")]
    pub token: Address,
    #[serde(serialize_with = "as_decimal")]
    pub amount: U256,
    pub period: u64,
    pub remaining_executions: u64,
    pub last_execution_timestamp: u64,
    /// Expected time of the next transfer, for active jobs.
    pub next_execution: Option<DateTime<Utc>>,
    pub status: JobStatus,
    /// Client-side only; never persisted on chain.
    pub cancel_pending: bool,
    pub last_cancel: Option<CancelOutcome>,
}

impl JobView {
    pub fn new(record: JobRecord) -> Self {
        let status = classify(&record);
        let next_execution = match status {
            JobStatus::Active => record
                .last_execution_timestamp
                .checked_add(record.period)
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            JobStatus::Completed | JobStatus::Deleted => None,
        };

        Self {
            id: record.id,
            recipient: record.recipient,
            sender: record.sender,
            token: record.token,
            amount: record.amount,
            period: record.period,
            remaining_executions: record.remaining_executions,
            last_execution_timestamp: record.last_execution_timestamp,
            next_execution,
            status,
            cancel_pending: false,
            last_cancel: None,
        }
    }

    pub fn can_cancel(&self) -> bool {
        self.status.is_cancellable() && !self.cancel_pending
    }
}

pub(crate) fn as_decimal<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// EIP-55 mixed-case hex.
pub(crate) fn as_checksum<S: Serializer>(value: &Address, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_checksum(None))
}

pub(crate) fn as_checksum_opt<S: Serializer>(
    value: &Option<Address>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(address) => as_checksum(address, serializer),
        None => serializer.serialize_none(),
    }
}

/// Outcome of one `jobsForAddress(owner, index)` read.
#[derive(Debug, Clone)]
pub enum IndexOutcome {
    Found(JobId),
    /// The contract reverted: index is past the end of the owner's list.
    EndOfList,
    Fault(DiscoveryError),
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;
    use crate::chain::contract::encode_job;

    const TOKEN: Address = address!("0xcB444e90D8198415266c6a2724b7900fb12FC56E");
    const SENDER: Address = address!("0x70997970C51812dc3A010C7d01b50e0d17dc79C8");
    const RECIPIENT: Address = address!("0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC");

    fn record(token: Address, remaining: u64) -> JobRecord {
        JobRecord {
            id: U256::from(1u64),
            period: 86_400,
            remaining_executions: remaining,
            amount: U256::from(5_000u64),
            last_execution_timestamp: 1_700_000_000,
            sender: SENDER,
            recipient: RECIPIENT,
            token,
        }
    }

    fn tuple(token: Address) -> jobsReturn {
        jobsReturn {
            period: U256::from(3_600u64),
            remainingExecutions: U256::from(4u64),
            amount: U256::from(10u64),
            lastExecutionTimestamp: U256::from(1_700_000_000u64),
            sender: SENDER,
            recipient: RECIPIENT,
            token,
        }
    }

    #[test]
    fn classify_priority() {
        assert_eq!(classify(&record(Address::ZERO, 5)), JobStatus::Deleted);
        assert_eq!(classify(&record(Address::ZERO, 0)), JobStatus::Deleted);
        assert_eq!(classify(&record(TOKEN, 0)), JobStatus::Completed);
        assert_eq!(classify(&record(TOKEN, 3)), JobStatus::Active);
    }

    #[test]
    fn status_strings() {
        assert_eq!(JobStatus::Active.to_string(), "active");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Deleted.to_string(), "deleted");
        assert!(!JobStatus::Deleted.is_cancellable());
    }

    #[test]
    fn decode_tuple() {
        let rec = JobRecord::from_return(U256::from(9u64), tuple(TOKEN)).unwrap();
        assert_eq!(rec.id, U256::from(9u64));
        assert_eq!(rec.period, 3_600);
        assert_eq!(rec.remaining_executions, 4);
        assert_eq!(rec.amount, U256::from(10u64));
        assert_eq!(rec.sender, SENDER);
        assert_eq!(rec.recipient, RECIPIENT);
        assert_eq!(rec.token, TOKEN);
    }

    #[test]
    fn decode_from_return_data() {
        let data = encode_job((
            U256::from(60u64),
            U256::from(2u64),
            U256::from(7u64),
            U256::ZERO,
            SENDER,
            RECIPIENT,
            TOKEN,
        ));
        let rec = JobRecord::decode(U256::from(3u64), &data).unwrap();
        assert_eq!(rec.period, 60);
        assert_eq!(rec.status(), JobStatus::Active);

        assert!(matches!(
            JobRecord::decode(U256::from(3u64), &data[..64]),
            Err(DecodeError::Abi(_))
        ));
    }

    #[test]
    fn decode_rejects_zero_period_on_live_job() {
        let mut ret = tuple(TOKEN);
        ret.period = U256::ZERO;
        assert_eq!(
            JobRecord::from_return(U256::ZERO, ret),
            Err(DecodeError::NotPositive { field: "period" })
        );
    }

    #[test]
    fn decode_rejects_oversized_period() {
        let mut ret = tuple(TOKEN);
        ret.period = U256::from(u64::MAX) + U256::from(1u64);
        assert_eq!(
            JobRecord::from_return(U256::ZERO, ret),
            Err(DecodeError::Overflow { field: "period" })
        );
    }

    #[test]
    fn decode_accepts_fully_zeroed_deleted_job() {
        let data = encode_job(Default::default());
        let rec = JobRecord::decode(U256::from(2u64), &data).unwrap();
        assert_eq!(rec.status(), JobStatus::Deleted);
    }

    #[test]
    fn view_next_execution_only_when_active() {
        let active = JobView::new(record(TOKEN, 2));
        assert_eq!(
            active.next_execution.map(|t| t.timestamp()),
            Some(1_700_000_000 + 86_400)
        );
        assert!(active.can_cancel());

        let done = JobView::new(record(TOKEN, 0));
        assert!(done.next_execution.is_none());
        assert!(!done.can_cancel());
    }

    #[test]
    fn view_serializes_amounts_as_decimal() {
        let view = JobView::new(record(TOKEN, 2));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], "1");
        assert_eq!(json["amount"], "5000");
        assert_eq!(json["status"], "active");
        assert_eq!(json["cancel_pending"], false);
        assert!(json["last_cancel"].is_null());
        // EIP-55 checksummed, not lowercase.
        assert_eq!(json["recipient"], "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC");
        assert_eq!(json["sender"], "0x70997970C51812dc3A010C7d01b50e0d17dc79C8");
    }

    #[test]
    fn cancel_outcome_is_tagged() {
        let json = serde_json::to_value(CancelOutcome::Failed {
            message: "user denied".into(),
        })
        .unwrap();
        assert_eq!(json["result"], "failed");
        assert_eq!(json["message"], "user denied");
    }
}
