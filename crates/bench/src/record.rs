//! The per-transaction record flowing from injector to aggregator.

use alloy_primitives::B256;
use chrono::{DateTime, TimeDelta, Utc};
use derive_more::{Display, From};

use crate::{AccountId, RpcRejection, transport::BlockSummary};

/// Index of an injector/tracker pair.
#[derive(Debug, Display, From, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{_0}")]
pub struct WorkerId(pub usize);

/// Why a record ended up failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The node refused the raw transaction.
    Rejected {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
    },
    /// Inclusion was never observed within the retry budget.
    Abandoned {
        /// Lookups made.
        attempts: u32,
    },
}

/// Tri-state outcome of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    /// Submitted, inclusion unknown.
    Pending,
    /// Included in a block.
    Accepted,
    /// Rejected or abandoned.
    Failed(FailureReason),
}

/// One attempted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    /// Worker that submitted it.
    pub worker: WorkerId,
    /// Sending account.
    pub account: AccountId,
    /// Nonce used.
    pub nonce: u64,
    /// Wall-clock submission time.
    pub submitted_at: DateTime<Utc>,
    /// Hash returned by the node.
    pub tx_hash: Option<B256>,
    /// Inclusion block, 0 while unknown.
    pub block_number: u64,
    /// Inclusion block timestamp in seconds.
    pub block_timestamp: Option<u64>,
    /// Inclusion block timestamp minus submission time.
    pub latency: Option<TimeDelta>,
    /// Outcome.
    pub status: RecordStatus,
}

impl SubmissionRecord {
    /// A record for a transaction handed to the node at `submitted_at`.
    pub const fn new(
        worker: WorkerId,
        account: AccountId,
        nonce: u64,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            worker,
            account,
            nonce,
            submitted_at,
            tx_hash: None,
            block_number: 0,
            block_timestamp: None,
            latency: None,
            status: RecordStatus::Pending,
        }
    }

    /// Stores the hash acknowledged by the node.
    pub fn accept_submission(mut self, hash: B256) -> Self {
        self.tx_hash = Some(hash);
        self
    }

    /// Marks the raw submission as refused.
    pub fn reject(mut self, rejection: &RpcRejection) -> Self {
        self.status = RecordStatus::Failed(FailureReason::Rejected {
            code: rejection.code,
            message: rejection.message.clone(),
        });
        self
    }

    /// Finalizes the record against its inclusion block and returns the latency.
    pub fn confirm(&mut self, block: &BlockSummary) -> TimeDelta {
        let latency = latency_between(self.submitted_at, block.timestamp);
        self.block_number = block.number;
        self.block_timestamp = Some(block.timestamp);
        self.latency = Some(latency);
        self.status = RecordStatus::Accepted;
        latency
    }

    /// Gives up on inclusion after `attempts` lookups.
    pub fn abandon(&mut self, attempts: u32) {
        self.status = RecordStatus::Failed(FailureReason::Abandoned { attempts });
    }

    /// Latency derived from the stored fields, if the block is known.
    pub fn recompute_latency(&self) -> Option<TimeDelta> {
        self.block_timestamp.map(|timestamp| latency_between(self.submitted_at, timestamp))
    }

    /// Whether the inclusion block is known.
    pub const fn is_included(&self) -> bool {
        self.block_number != 0
    }
}

/// `block_timestamp - submitted_at`, which may be zero or negative when the
/// block's second truncates below the submission instant.
pub fn latency_between(submitted_at: DateTime<Utc>, block_timestamp: u64) -> TimeDelta {
    let block_time = DateTime::<Utc>::from_timestamp(block_timestamp as i64, 0)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    block_time.signed_duration_since(submitted_at)
}
