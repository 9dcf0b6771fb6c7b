//! Admission-controlled transaction injection.

use std::{fmt, sync::Arc, time::Duration};

use alloy_primitives::{Bytes, keccak256};
use chrono::Utc;
use derive_more::Display;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    AccountId, AccountLedger, AdmissionSignal, BenchMetrics, CallError, InjectorConfig,
    InjectorError, LedgerError, LegacySigner, PendingPoolSnapshot, RpcRejection, SigningError,
    SubmissionRecord, TxSigner, WorkerId,
    transport::{BlockTag, RpcClient, Transport},
};

/// Where an injector is in its lifecycle.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum InjectorState {
    /// Nonces not yet synced with the chain.
    Init,
    /// Reading the pending-pool signal.
    PollingPool,
    /// Submitting a burst.
    BurstSubmit,
    /// Duration elapsed or shutdown requested.
    Done,
    /// A step kept failing after every reconnect.
    Failed,
}

/// Channels an injector feeds.
#[derive(Debug, Clone)]
pub struct RecordSinks {
    /// Accepted submissions awaiting inclusion.
    pub tracker: mpsc::Sender<SubmissionRecord>,
    /// Every submission outcome, for live counts.
    pub stats: mpsc::Sender<SubmissionRecord>,
}

/// What an injector did over its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectorReport {
    /// Worker index.
    pub worker: WorkerId,
    /// Transactions accepted by the node.
    pub submitted: u64,
    /// Transactions refused by the node.
    pub rejected: u64,
    /// Poll/burst cycles completed.
    pub cycles: u64,
    /// Nonces consumed per account since startup.
    pub nonce_offsets: Vec<(AccountId, u64)>,
    /// Final state.
    pub state: InjectorState,
    /// Time spent injecting.
    pub elapsed: Duration,
}

enum BuildError {
    Ledger(LedgerError),
    Signing(SigningError),
}

impl From<LedgerError> for BuildError {
    fn from(error: LedgerError) -> Self {
        Self::Ledger(error)
    }
}

/// Drives one worker's accounts: keeps the node's pending pool filled up to
/// the ceiling and hands every submission downstream.
pub struct Injector<T> {
    worker: WorkerId,
    config: InjectorConfig,
    client: RpcClient<T>,
    ledger: AccountLedger,
    signer: Arc<dyn TxSigner>,
    admission: AdmissionSignal,
    sinks: RecordSinks,
    metrics: BenchMetrics,
    state: InjectorState,
    started: Option<Instant>,
    submitted: u64,
    rejected: u64,
    cycles: u64,
}

impl<T> fmt::Debug for Injector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("worker", &self.worker)
            .field("state", &self.state)
            .field("accounts", &self.ledger.len())
            .field("submitted", &self.submitted)
            .field("rejected", &self.rejected)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Injector<T> {
    /// Creates an injector signing legacy transfers and gated by `txpool_status` alone.
    pub fn new(
        worker: WorkerId,
        config: InjectorConfig,
        client: RpcClient<T>,
        ledger: AccountLedger,
        sinks: RecordSinks,
    ) -> Self {
        Self {
            worker,
            config,
            client,
            ledger,
            signer: Arc::new(LegacySigner),
            admission: AdmissionSignal::default(),
            sinks,
            metrics: BenchMetrics::default(),
            state: InjectorState::Init,
            started: None,
            submitted: 0,
            rejected: 0,
            cycles: 0,
        }
    }

    /// Replaces the transaction signer.
    pub fn with_signer(mut self, signer: Arc<dyn TxSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Replaces the admission signal.
    pub fn with_admission(mut self, admission: AdmissionSignal) -> Self {
        self.admission = admission;
        self
    }

    /// Current state.
    pub const fn state(&self) -> InjectorState {
        self.state
    }

    /// The accounts driven by this injector.
    pub const fn ledger(&self) -> &AccountLedger {
        &self.ledger
    }

    /// Syncs every account with its `pending` nonce.
    pub async fn init(&mut self) -> Result<(), InjectorError> {
        let accounts: Vec<_> =
            self.ledger.accounts().map(|account| (account.id(), account.address())).collect();

        for (id, address) in accounts {
            let mut attempt = 0;
            let nonce = loop {
                match self.client.transaction_count(address, BlockTag::Pending).await {
                    Ok(nonce) => break nonce,
                    Err(error) => self.recover("nonce sync", &mut attempt, error).await?,
                }
            };
            self.ledger.resync(id, nonce)?;
            info!(worker = %self.worker, account = %id, %address, nonce, "account synced");
        }

        self.state = InjectorState::PollingPool;
        Ok(())
    }

    /// One poll-then-burst cycle. Returns the number of transactions built.
    pub async fn run_cycle(&mut self) -> Result<u64, InjectorError> {
        self.state = InjectorState::PollingPool;
        let snapshot = self.poll_pool().await?;
        let headroom = snapshot.headroom(self.config.ceiling);
        let count = headroom.min(self.config.burst_size);
        self.metrics.observed_pending.set(snapshot.observed_pending() as f64);

        if count == 0 {
            debug!(
                worker = %self.worker,
                observed = snapshot.observed_pending(),
                ceiling = self.config.ceiling,
                "pending pool at ceiling, skipping burst"
            );
            self.cycles += 1;
            return Ok(0);
        }

        self.state = InjectorState::BurstSubmit;
        let mut built = 0;
        for _ in 0..count {
            let Some(account) = self.ledger.next_account() else { break };
            let (nonce, raw) = match self.build(account) {
                Ok(signed) => signed,
                Err(BuildError::Ledger(error)) => return Err(error.into()),
                Err(BuildError::Signing(error)) => {
                    warn!(worker = %self.worker, account = %account, error = %error, "signing failed, aborting burst");
                    break;
                }
            };
            self.submit(account, nonce, raw).await?;
            built += 1;
        }

        self.cycles += 1;
        info!(
            worker = %self.worker,
            observed = snapshot.observed_pending(),
            headroom,
            built,
            submitted = self.submitted,
            "burst complete"
        );
        Ok(built)
    }

    /// Runs cycles until the duration elapses or `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) -> InjectorReport {
        if self.state == InjectorState::Init {
            if let Err(error) = self.init().await {
                error!(worker = %self.worker, error = %error, "injector failed to start");
                self.state = InjectorState::Failed;
                return self.finish().await;
            }
        }

        // The duration counts from here, not from the nonce sync.
        let started = Instant::now();
        self.started = Some(started);
        info!(
            worker = %self.worker,
            accounts = self.ledger.len(),
            ceiling = self.config.ceiling,
            burst_size = self.config.burst_size,
            duration_secs = self.config.duration.as_secs(),
            "starting injector"
        );

        loop {
            if started.elapsed() >= self.config.duration {
                info!(worker = %self.worker, "duration elapsed, stopping injector");
                self.state = InjectorState::Done;
                break;
            }
            if shutdown.is_cancelled() {
                info!(worker = %self.worker, "shutdown signal received");
                self.state = InjectorState::Done;
                break;
            }

            if let Err(error) = self.run_cycle().await {
                error!(worker = %self.worker, error = %error, "injector failed");
                self.state = InjectorState::Failed;
                break;
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(worker = %self.worker, "shutdown signal received");
                    self.state = InjectorState::Done;
                    break;
                }
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        self.finish().await
    }

    /// Counters and nonce offsets so far.
    pub fn report(&self) -> InjectorReport {
        InjectorReport {
            worker: self.worker,
            submitted: self.submitted,
            rejected: self.rejected,
            cycles: self.cycles,
            nonce_offsets: self.ledger.offsets(),
            state: self.state,
            elapsed: self.started.map(|started| started.elapsed()).unwrap_or_default(),
        }
    }

    async fn finish(mut self) -> InjectorReport {
        self.client.close().await;
        let report = self.report();
        info!(
            worker = %report.worker,
            state = %report.state,
            submitted = report.submitted,
            rejected = report.rejected,
            cycles = report.cycles,
            "injector finished"
        );
        report
    }

    async fn poll_pool(&mut self) -> Result<PendingPoolSnapshot, InjectorError> {
        let mut attempt = 0;
        loop {
            match self.admission.snapshot(&mut self.client).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(error) => self.recover("pool status", &mut attempt, error).await?,
            }
        }
    }

    fn build(&mut self, account: AccountId) -> Result<(u64, Bytes), BuildError> {
        let template = self.config.transfer;
        let chain_id = self.config.chain_id;
        let signer = &self.signer;
        self.ledger.reserve_with(account, |owner, nonce| {
            signer.sign(&template.request(nonce, chain_id), owner.signer()).map_err(BuildError::Signing)
        })
    }

    /// Submits `raw`, resending the same bytes after transport failures.
    async fn submit(&mut self, account: AccountId, nonce: u64, raw: Bytes) -> Result<(), InjectorError> {
        let record = SubmissionRecord::new(self.worker, account, nonce, Utc::now());
        let local_hash = keccak256(&raw);

        let mut attempt = 0;
        let mut desynced = false;
        let outcome: Result<(), RpcRejection> = loop {
            match self.client.send_raw_transaction(raw.clone()).await {
                Ok(hash) => {
                    if hash != local_hash {
                        warn!(worker = %self.worker, nonce, %hash, %local_hash, "acknowledgement carries another hash");
                        desynced = true;
                    }
                    break Ok(());
                }
                Err(CallError::Rejected(rejection)) if attempt > 0 && rejection.is_already_known() => {
                    debug!(worker = %self.worker, nonce, %local_hash, "resubmission already known");
                    break Ok(());
                }
                Err(CallError::Rejected(rejection)) => break Err(rejection),
                Err(CallError::Protocol(error)) => {
                    warn!(worker = %self.worker, nonce, error = %error, "malformed acknowledgement, using local hash");
                    desynced = true;
                    break Ok(());
                }
                Err(error) => self.recover("raw submission", &mut attempt, error).await?,
            }
        };

        // The real acknowledgement may still be queued and would answer the
        // next submission under the same id.
        if desynced {
            self.resync_session().await;
        }

        match outcome {
            Ok(()) => {
                self.submitted += 1;
                self.metrics.submitted.increment(1);
                let record = record.accept_submission(local_hash);
                self.sinks.stats.send(record.clone()).await.map_err(|_| InjectorError::ChannelClosed)?;
                self.sinks.tracker.send(record).await.map_err(|_| InjectorError::ChannelClosed)?;
            }
            Err(rejection) => {
                warn!(
                    worker = %self.worker,
                    account = %account,
                    nonce,
                    code = rejection.code,
                    message = rejection.message.as_str(),
                    "transaction rejected"
                );
                self.rejected += 1;
                self.metrics.rejected.increment(1);
                let record = record.reject(&rejection);
                self.sinks.stats.send(record).await.map_err(|_| InjectorError::ChannelClosed)?;
            }
        }
        Ok(())
    }

    /// Drops any frames left over from an exchange that lost its correlation.
    async fn resync_session(&mut self) {
        self.metrics.reconnects.increment(1);
        if let Err(error) = self.client.reconnect().await {
            warn!(worker = %self.worker, error = %error, "reconnect after desync failed");
        }
    }

    /// Reconnects after a failed step, or gives up once the retry budget is spent.
    async fn recover(
        &mut self,
        step: &'static str,
        attempt: &mut u32,
        error: CallError,
    ) -> Result<(), InjectorError> {
        if *attempt >= self.config.max_transport_retries || matches!(error, CallError::Rejected(_)) {
            return Err(InjectorError::RetriesExhausted { step, attempts: *attempt + 1, source: error });
        }
        *attempt += 1;
        warn!(worker = %self.worker, step, attempt = *attempt, error = %error, "step failed, retrying");

        if error.is_transport() {
            self.metrics.reconnects.increment(1);
            if let Err(error) = self.client.reconnect().await {
                warn!(worker = %self.worker, step, error = %error, "reconnect failed");
            }
        }
        Ok(())
    }
}
