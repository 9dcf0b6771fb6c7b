//! Inclusion discovery and confirmation latency.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    time::Duration,
};

use alloy_primitives::B256;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tracing::{debug, info, trace, warn};

use crate::{
    BenchMetrics, CallError, SubmissionRecord, TrackerConfig, WorkerId,
    transport::{BlockSummary, RpcClient, Transport},
};

/// Block metadata keyed by number, evicting the oldest insertions first.
#[derive(Debug, Clone)]
pub struct BlockCache {
    blocks: HashMap<u64, BlockSummary>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl BlockCache {
    /// A cache holding at most `capacity` blocks.
    pub fn new(capacity: usize) -> Self {
        Self { blocks: HashMap::new(), order: VecDeque::new(), capacity: capacity.max(1) }
    }

    /// Cached block `number`.
    pub fn get(&self, number: u64) -> Option<BlockSummary> {
        self.blocks.get(&number).copied()
    }

    /// Caches `block`.
    pub fn insert(&mut self, block: BlockSummary) {
        if self.blocks.insert(block.number, block).is_some() {
            return;
        }
        self.order.push_back(block.number);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.blocks.remove(&evicted);
            }
        }
    }

    /// Blocks cached.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// A record waiting for its next lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEntry {
    /// The record.
    pub record: SubmissionRecord,
    /// Lookups made so far.
    pub attempts: u32,
    /// Earliest time of the next lookup.
    pub ready_at: Instant,
}

/// Bounded FIFO of records awaiting another lookup.
///
/// The backoff is fixed, so insertion order is also readiness order.
#[derive(Debug, Clone)]
pub struct RetryQueue {
    entries: VecDeque<RetryEntry>,
    capacity: usize,
    backoff: Duration,
}

impl RetryQueue {
    /// A queue of at most `capacity` entries, each retried `backoff` after it was queued.
    pub fn new(capacity: usize, backoff: Duration) -> Self {
        Self { entries: VecDeque::new(), capacity: capacity.max(1), backoff }
    }

    /// Queues `record` for a lookup `backoff` after `now`.
    pub fn push(&mut self, record: SubmissionRecord, attempts: u32, now: Instant) {
        self.entries.push_back(RetryEntry { record, attempts, ready_at: now + self.backoff });
    }

    /// Removes the oldest entry if it is due.
    pub fn pop_ready(&mut self, now: Instant) -> Option<RetryEntry> {
        if self.entries.front()?.ready_at <= now { self.entries.pop_front() } else { None }
    }

    /// When the oldest entry becomes due.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.entries.front().map(|entry| entry.ready_at)
    }

    /// Whether no more records may be admitted.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Entries waiting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a tracker did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerReport {
    /// Worker index.
    pub worker: WorkerId,
    /// Records finalized with an inclusion block.
    pub confirmed: u64,
    /// Records given up on.
    pub abandoned: u64,
    /// Records with a non-positive latency.
    pub data_quality_warnings: u64,
    /// Transaction lookups issued.
    pub lookups: u64,
    /// Reconnects performed.
    pub reconnects: u64,
}

/// Resolves the inclusion block of every accepted submission of one worker.
pub struct ConfirmationTracker<T> {
    config: TrackerConfig,
    client: RpcClient<T>,
    input: mpsc::Receiver<SubmissionRecord>,
    output: mpsc::Sender<SubmissionRecord>,
    cache: BlockCache,
    queue: RetryQueue,
    metrics: BenchMetrics,
    report: TrackerReport,
}

impl<T> fmt::Debug for ConfirmationTracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationTracker")
            .field("config", &self.config)
            .field("queued", &self.queue.len())
            .field("cached_blocks", &self.cache.len())
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ConfirmationTracker<T> {
    /// Creates a tracker reading `input` and forwarding finalized records to `output`.
    pub fn new(
        worker: WorkerId,
        config: TrackerConfig,
        client: RpcClient<T>,
        input: mpsc::Receiver<SubmissionRecord>,
        output: mpsc::Sender<SubmissionRecord>,
    ) -> Self {
        Self {
            config,
            client,
            input,
            output,
            cache: BlockCache::new(config.block_cache_size),
            queue: RetryQueue::new(config.queue_capacity, config.retry_backoff),
            metrics: BenchMetrics::default(),
            report: TrackerReport { worker, ..Default::default() },
        }
    }

    /// Runs until the input closes and every queued record is finalized.
    ///
    /// New records are only pulled while the retry queue has room, so a slow
    /// chain backs pressure up into the injector.
    pub async fn run(mut self) -> TrackerReport {
        let worker = self.report.worker;
        info!(%worker, "starting confirmation tracker");

        let mut input_open = true;
        loop {
            if !input_open && self.queue.is_empty() {
                break;
            }

            let next_retry = self.queue.next_ready_at();
            let accepting = input_open && !self.queue.is_full();
            tokio::select! {
                biased;

                _ = sleep_until(next_retry.unwrap_or_else(Instant::now)), if next_retry.is_some() => {
                    if let Some(entry) = self.queue.pop_ready(Instant::now()) {
                        if self.process(entry.record, entry.attempts).await.is_err() {
                            break;
                        }
                    }
                }
                received = self.input.recv(), if accepting => match received {
                    Some(record) => {
                        if self.process(record, 0).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!(%worker, queued = self.queue.len(), "tracker input closed, draining");
                        input_open = false;
                    }
                },
            }
        }

        self.client.close().await;
        info!(
            %worker,
            confirmed = self.report.confirmed,
            abandoned = self.report.abandoned,
            warnings = self.report.data_quality_warnings,
            "confirmation tracker finished"
        );
        self.report
    }

    /// One lookup round for `record`. Errors only when the output channel is gone.
    async fn process(&mut self, mut record: SubmissionRecord, prior: u32) -> Result<(), ChannelClosed> {
        let attempts = prior + 1;
        let Some(hash) = record.tx_hash else {
            warn!(worker = %record.worker, nonce = record.nonce, "record without hash, dropping");
            return Ok(());
        };

        match self.resolve(&mut record, hash).await {
            Ok(Some(block)) => self.finalize(record, block).await,
            Ok(None) => {
                trace!(%hash, attempts, "not yet included");
                self.retry_or_abandon(record, attempts).await
            }
            Err(error) => {
                warn!(worker = %record.worker, %hash, attempts, error = %error, "lookup failed");
                if error.is_transport() {
                    self.report.reconnects += 1;
                    self.metrics.reconnects.increment(1);
                    if let Err(error) = self.client.reconnect().await {
                        warn!(worker = %record.worker, error = %error, "reconnect failed");
                    }
                }
                self.retry_or_abandon(record, attempts).await
            }
        }
    }

    /// The inclusion block of `record`, or `None` while it is not yet visible.
    async fn resolve(
        &mut self,
        record: &mut SubmissionRecord,
        hash: B256,
    ) -> Result<Option<BlockSummary>, CallError> {
        if !record.is_included() {
            self.report.lookups += 1;
            let tx = self.client.transaction_by_hash(hash).await?;
            match tx.and_then(|tx| tx.inclusion_block()) {
                Some(number) => record.block_number = number,
                None => return Ok(None),
            }
        }

        if let Some(block) = self.cache.get(record.block_number) {
            return Ok(Some(block));
        }
        let block = self.client.block_by_number(record.block_number).await?;
        if let Some(block) = block {
            self.cache.insert(block);
        }
        Ok(block)
    }

    async fn finalize(
        &mut self,
        mut record: SubmissionRecord,
        block: BlockSummary,
    ) -> Result<(), ChannelClosed> {
        let latency = record.confirm(&block);
        if latency <= chrono::TimeDelta::zero() {
            self.report.data_quality_warnings += 1;
            self.metrics.data_quality_warnings.increment(1);
            warn!(
                worker = %record.worker,
                nonce = record.nonce,
                block = block.number,
                latency_ms = latency.num_milliseconds(),
                "non-positive confirmation latency"
            );
        }

        self.report.confirmed += 1;
        self.metrics.confirmed.increment(1);
        self.metrics.confirmation_latency.record(latency.num_milliseconds() as f64 / 1_000.0);
        debug!(
            worker = %record.worker,
            nonce = record.nonce,
            block = block.number,
            latency_ms = latency.num_milliseconds(),
            "transaction confirmed"
        );
        self.output.send(record).await.map_err(|_| ChannelClosed)
    }

    async fn retry_or_abandon(
        &mut self,
        mut record: SubmissionRecord,
        attempts: u32,
    ) -> Result<(), ChannelClosed> {
        if attempts < self.config.max_attempts {
            // pop-before-push keeps the queue within capacity
            self.queue.push(record, attempts, Instant::now());
            return Ok(());
        }

        warn!(
            worker = %record.worker,
            nonce = record.nonce,
            hash = ?record.tx_hash,
            attempts,
            "inclusion not observed, abandoning"
        );
        record.abandon(attempts);
        self.report.abandoned += 1;
        self.metrics.abandoned.increment(1);
        self.output.send(record).await.map_err(|_| ChannelClosed)
    }
}

#[derive(Debug)]
struct ChannelClosed;

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        AccountId, FailureReason, RecordStatus,
        test_utils::{MockNode, ScriptedTransport},
    };

    const SUBMITTED: i64 = 1_700_000_000;

    fn record(hash: B256) -> SubmissionRecord {
        SubmissionRecord::new(
            WorkerId(0),
            AccountId(0),
            0,
            Utc.timestamp_opt(SUBMITTED, 0).unwrap(),
        )
        .accept_submission(hash)
    }

    async fn track(
        node: &MockNode,
        config: TrackerConfig,
        records: Vec<SubmissionRecord>,
    ) -> (TrackerReport, Vec<SubmissionRecord>) {
        let (input_tx, input_rx) = mpsc::channel(16);
        let (output_tx, mut output_rx) = mpsc::channel(16);
        let client = RpcClient::new(ScriptedTransport::new(node.clone()));
        let tracker = ConfirmationTracker::new(WorkerId(0), config, client, input_rx, output_tx);

        let handle = tokio::spawn(tracker.run());
        for record in records {
            input_tx.send(record).await.unwrap();
        }
        drop(input_tx);

        let report = handle.await.unwrap();
        let mut out = Vec::new();
        while let Some(record) = output_rx.recv().await {
            out.push(record);
        }
        (report, out)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_included() {
        let node = MockNode::new(1);
        let hash = B256::repeat_byte(7);
        node.script_inclusion(hash, vec![None, None, None, Some(100)]);
        node.insert_block(100, SUBMITTED as u64 + 2);

        let (report, out) = track(&node, TrackerConfig::default(), vec![record(hash)]).await;

        assert_eq!(node.tx_lookups(hash), 4);
        assert_eq!(report.lookups, 4);
        assert_eq!(report.confirmed, 1);
        assert_eq!(out[0].status, RecordStatus::Accepted);
        assert_eq!(out[0].block_number, 100);
        assert_eq!(out[0].latency, Some(chrono::TimeDelta::seconds(2)));
        assert_eq!(out[0].recompute_latency(), out[0].latency);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_latency_is_flagged_but_accepted() {
        let node = MockNode::new(1);
        let hash = B256::repeat_byte(1);
        node.script_inclusion(hash, vec![Some(5)]);
        node.insert_block(5, SUBMITTED as u64);

        let (report, out) = track(&node, TrackerConfig::default(), vec![record(hash)]).await;

        assert_eq!(report.data_quality_warnings, 1);
        assert_eq!(out[0].status, RecordStatus::Accepted);
        assert_eq!(out[0].latency, Some(chrono::TimeDelta::zero()));
    }

    #[tokio::test(start_paused = true)]
    async fn abandons_after_max_attempts() {
        let node = MockNode::new(1);
        let hash = B256::repeat_byte(2);
        let config = TrackerConfig { max_attempts: 3, ..Default::default() };

        let (report, out) = track(&node, config, vec![record(hash)]).await;

        assert_eq!(node.tx_lookups(hash), 3);
        assert_eq!(report.abandoned, 1);
        assert_eq!(out[0].status, RecordStatus::Failed(FailureReason::Abandoned { attempts: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn block_beyond_head_is_retried() {
        let node = MockNode::new(1);
        let hash = B256::repeat_byte(3);
        node.script_inclusion(hash, vec![Some(9)]);

        let node_clone = node.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            node_clone.insert_block(9, SUBMITTED as u64 + 1);
        });

        let (report, out) = track(&node, TrackerConfig::default(), vec![record(hash)]).await;

        assert_eq!(report.confirmed, 1);
        assert_eq!(out[0].block_number, 9);
        // inclusion is remembered, only the block is looked up again
        assert_eq!(node.tx_lookups(hash), 1);
        assert!(node.block_lookups() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_counts_as_attempt() {
        let node = MockNode::new(1);
        let hash = B256::repeat_byte(4);
        node.script_inclusion(hash, vec![Some(11)]);
        node.insert_block(11, SUBMITTED as u64 + 1);
        node.fail_next_receives(1);

        let (report, out) = track(&node, TrackerConfig::default(), vec![record(hash)]).await;

        assert_eq!(report.reconnects, 1);
        assert_eq!(node.reconnects(), 1);
        assert_eq!(out[0].status, RecordStatus::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_blocks_are_cached() {
        let node = MockNode::new(1);
        let hashes: Vec<_> = (10..14).map(B256::repeat_byte).collect();
        for hash in &hashes {
            node.script_inclusion(*hash, vec![Some(20)]);
        }
        node.insert_block(20, SUBMITTED as u64 + 1);

        let (report, _) =
            track(&node, TrackerConfig::default(), hashes.iter().copied().map(record).collect()).await;

        assert_eq!(report.confirmed, 4);
        assert_eq!(node.block_lookups(), 1);
    }

    #[test]
    fn retry_queue_orders_by_readiness() {
        let now = Instant::now();
        let mut queue = RetryQueue::new(2, Duration::from_secs(1));
        queue.push(record(B256::repeat_byte(1)), 1, now);
        queue.push(record(B256::repeat_byte(2)), 1, now + Duration::from_millis(10));

        assert!(queue.is_full());
        assert_eq!(queue.pop_ready(now), None);
        assert_eq!(queue.next_ready_at(), Some(now + Duration::from_secs(1)));

        let first = queue.pop_ready(now + Duration::from_secs(1)).unwrap();
        assert_eq!(first.record.tx_hash, Some(B256::repeat_byte(1)));
        assert!(queue.pop_ready(now + Duration::from_secs(1)).is_none());
        assert!(!queue.is_full());
    }

    #[test]
    fn block_cache_evicts_oldest() {
        let mut cache = BlockCache::new(2);
        for number in 1..=3 {
            cache.insert(BlockSummary { number, timestamp: number, hash: B256::ZERO });
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.get(3).map(|block| block.timestamp), Some(3));
    }
}
