//! Wires workers and the aggregator together for one benchmark run.

use std::{fmt, sync::Arc};

use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use eyre::WrapErr;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::{
    Account, AccountId, AccountLedger, AdmissionSignal, BenchConfig, CallError, ConfigError,
    ConfirmationTracker, HttpUnconfirmedSource, Injector, InjectorReport, StatsAggregator,
    RecordSinks, Summary, TrackerReport, TransportError, UnconfirmedSource, WorkerId,
    transport::{RpcClient, SessionOptions, Transport, WsSession},
};

/// Opens sessions to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Session type produced.
    type Transport: Transport + 'static;

    /// Dials `endpoint`.
    async fn connect(
        &self,
        endpoint: &Url,
        options: SessionOptions,
    ) -> Result<Self::Transport, TransportError>;
}

/// Dials real websocket sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsSession;

    async fn connect(
        &self,
        endpoint: &Url,
        options: SessionOptions,
    ) -> Result<WsSession, TransportError> {
        WsSession::connect(endpoint.clone(), options).await
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct BenchReport {
    /// Aggregated figures.
    pub summary: Summary,
    /// One per worker, in worker order.
    pub injectors: Vec<InjectorReport>,
    /// One per worker, in worker order.
    pub trackers: Vec<TrackerReport>,
}

/// A configured benchmark run.
pub struct Bench<C = WsConnector> {
    config: BenchConfig,
    keys: Vec<PrivateKeySigner>,
    connector: C,
    unconfirmed: Option<Arc<dyn UnconfirmedSource>>,
}

impl<C: fmt::Debug> fmt::Debug for Bench<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bench")
            .field("config", &self.config)
            .field("accounts", &self.keys.len())
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

impl Bench {
    /// A run over websocket sessions signing with `keys`.
    pub fn new(config: BenchConfig, keys: Vec<PrivateKeySigner>) -> Self {
        Self { config, keys, connector: WsConnector, unconfirmed: None }
    }
}

impl<C: Connector> Bench<C> {
    /// Replaces how sessions are opened.
    pub fn with_connector<D: Connector>(self, connector: D) -> Bench<D> {
        Bench { config: self.config, keys: self.keys, connector, unconfirmed: self.unconfirmed }
    }

    /// Uses `source` for the unconfirmed count instead of `metrics_url`.
    pub fn with_unconfirmed_source(mut self, source: Arc<dyn UnconfirmedSource>) -> Self {
        self.unconfirmed = Some(source);
        self
    }

    /// Runs until the duration elapses or `shutdown` fires, then waits for
    /// every in-flight record to be finalized.
    ///
    /// Configuration and startup failures abort before any worker submits.
    pub async fn run(self, shutdown: CancellationToken) -> eyre::Result<BenchReport> {
        let Self { config, keys, connector, unconfirmed } = self;
        config.validate()?;
        if keys.is_empty() {
            return Err(ConfigError::NoAccounts.into());
        }

        let workers = if config.workers > keys.len() {
            warn!(
                workers = config.workers,
                accounts = keys.len(),
                "more workers than accounts, running one worker per account"
            );
            keys.len()
        } else {
            config.workers
        };

        let unconfirmed = match (unconfirmed, &config.metrics_url) {
            (Some(source), _) => Some(source),
            (None, Some(url)) => {
                Some(Arc::new(HttpUnconfirmedSource::new(url)?) as Arc<dyn UnconfirmedSource>)
            }
            (None, None) => None,
        };

        let mut groups: Vec<Vec<Account>> = (0..workers).map(|_| Vec::new()).collect();
        for (index, key) in keys.into_iter().enumerate() {
            groups[index % workers].push(Account::new(AccountId(index), key));
        }

        let capacity = config.channel_capacity();
        let (stats_tx, stats_rx) = mpsc::channel(capacity);
        let options = config.session_options();

        let mut injectors = Vec::with_capacity(workers);
        let mut trackers = Vec::with_capacity(workers);
        for (index, accounts) in groups.into_iter().enumerate() {
            let worker = WorkerId(index);
            let endpoint = config
                .endpoint_for(index)
                .ok_or_else(|| ConfigError::Invalid("no endpoint configured".into()))?;

            let injector_client = open(&connector, endpoint, options, config.chain_id).await?;
            let tracker_client = open(&connector, endpoint, options, config.chain_id).await?;
            info!(%worker, %endpoint, accounts = accounts.len(), "worker connected");

            let (tracker_tx, tracker_rx) = mpsc::channel(capacity);
            let sinks = RecordSinks { tracker: tracker_tx, stats: stats_tx.clone() };
            let mut injector = Injector::new(
                worker,
                config.injector(),
                injector_client,
                AccountLedger::new(accounts),
                sinks,
            )
            .with_admission(AdmissionSignal::new(unconfirmed.clone()));
            injector.init().await.wrap_err_with(|| format!("worker {worker} failed to sync nonces"))?;

            injectors.push(injector);
            trackers.push(ConfirmationTracker::new(
                worker,
                config.tracker,
                tracker_client,
                tracker_rx,
                stats_tx.clone(),
            ));
        }
        drop(stats_tx);

        info!(
            workers,
            ceiling = config.ceiling,
            burst_size = config.burst_size,
            duration_secs = config.duration.as_secs(),
            "all workers synced, starting benchmark"
        );

        let aggregator = tokio::spawn(StatsAggregator::new(config.report_interval).run(stats_rx));
        let tracker_handles: Vec<JoinHandle<TrackerReport>> =
            trackers.into_iter().map(|tracker| tokio::spawn(tracker.run())).collect();
        let injector_handles: Vec<JoinHandle<InjectorReport>> = injectors
            .into_iter()
            .map(|injector| tokio::spawn(injector.run(shutdown.clone())))
            .collect();

        let mut injector_reports = Vec::with_capacity(workers);
        for handle in injector_handles {
            let report = handle.await.wrap_err("injector task panicked")?;
            info!(
                worker = %report.worker,
                state = %report.state,
                submitted = report.submitted,
                rejected = report.rejected,
                nonce_offsets = ?report.nonce_offsets,
                "injector report"
            );
            injector_reports.push(report);
        }

        let mut tracker_reports = Vec::with_capacity(workers);
        for handle in tracker_handles {
            let report = handle.await.wrap_err("tracker task panicked")?;
            info!(
                worker = %report.worker,
                confirmed = report.confirmed,
                abandoned = report.abandoned,
                lookups = report.lookups,
                reconnects = report.reconnects,
                "tracker report"
            );
            tracker_reports.push(report);
        }

        let summary = aggregator.await.wrap_err("aggregator task panicked")?;
        Ok(BenchReport { summary, injectors: injector_reports, trackers: tracker_reports })
    }
}

/// Connects and checks the chain id. Any failure here is a startup error.
async fn open<C: Connector>(
    connector: &C,
    endpoint: &Url,
    options: SessionOptions,
    chain_id: u64,
) -> Result<RpcClient<C::Transport>, ConfigError> {
    let unreachable =
        |source: CallError| ConfigError::Unreachable { endpoint: endpoint.to_string(), source };
    let transport =
        connector.connect(endpoint, options).await.map_err(|e| unreachable(e.into()))?;
    let mut client = RpcClient::new(transport);

    let actual = client.chain_id().await.map_err(unreachable)?;
    if actual != chain_id {
        client.close().await;
        return Err(ConfigError::ChainIdMismatch { expected: chain_id, actual });
    }
    Ok(client)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::{
        AdmissionError, InjectorState, UnconfirmedTxs,
        test_utils::{MockNode, ScriptedTransport},
    };

    #[derive(Debug, Clone)]
    struct MockConnector(MockNode);

    #[async_trait]
    impl Connector for MockConnector {
        type Transport = ScriptedTransport;

        async fn connect(
            &self,
            _endpoint: &Url,
            _options: SessionOptions,
        ) -> Result<ScriptedTransport, TransportError> {
            Ok(ScriptedTransport::new(self.0.clone()))
        }
    }

    #[derive(Debug)]
    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        type Transport = ScriptedTransport;

        async fn connect(
            &self,
            _endpoint: &Url,
            _options: SessionOptions,
        ) -> Result<ScriptedTransport, TransportError> {
            Err(TransportError::Closed)
        }
    }

    fn config(chain_id: u64) -> BenchConfig {
        BenchConfig::default()
            .with_endpoint(Url::parse("ws://127.0.0.1:8546").unwrap())
            .with_chain_id(chain_id)
            .with_workers(2)
            .with_ceiling(1_000)
            .with_burst_size(5)
            .with_duration(Duration::from_secs(3))
    }

    #[tokio::test(start_paused = true)]
    async fn every_submission_is_confirmed() {
        let node = MockNode::new(5151);
        node.include_all_at(Some(10));
        node.insert_block(10, Utc::now().timestamp() as u64 + 5);
        let keys: Vec<_> = (0..4).map(|_| PrivateKeySigner::random()).collect();
        node.set_nonce(keys[1].address(), 7);

        let report = Bench::new(config(5151), keys)
            .with_connector(MockConnector(node.clone()))
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.injectors.len(), 2);
        assert!(report.injectors.iter().all(|injector| injector.state == InjectorState::Done));
        let submitted: u64 = report.injectors.iter().map(|injector| injector.submitted).sum();
        assert!(submitted > 0);
        assert_eq!(submitted, node.submitted().len() as u64);

        for injector in &report.injectors {
            let offsets: u64 = injector.nonce_offsets.iter().map(|(_, offset)| offset).sum();
            assert_eq!(offsets, injector.submitted);
            assert_eq!(injector.nonce_offsets.len(), 2);
        }

        assert_eq!(report.summary.submitted, submitted);
        assert_eq!(report.summary.confirmed, submitted);
        assert_eq!(report.summary.failed, 0);
        assert_eq!(report.summary.data_quality_warnings, 0);
        let confirmed: u64 = report.trackers.iter().map(|tracker| tracker.confirmed).sum();
        assert_eq!(confirmed, submitted);
        // One lookup per tracker; each keeps its own block cache.
        assert_eq!(node.block_lookups(), 2);
    }

    #[tokio::test]
    async fn chain_id_mismatch_aborts() {
        let node = MockNode::new(1);
        let error = Bench::new(config(5151), vec![PrivateKeySigner::random()])
            .with_connector(MockConnector(node.clone()))
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            error.downcast_ref::<ConfigError>(),
            Some(ConfigError::ChainIdMismatch { expected: 5151, actual: 1 })
        ));
        assert!(node.submitted().is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_aborts() {
        let error = Bench::new(config(5151), vec![PrivateKeySigner::random()])
            .with_connector(Refusing)
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error.downcast_ref::<ConfigError>(), Some(ConfigError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn no_accounts_is_rejected() {
        let error = Bench::new(config(5151), Vec::new())
            .with_connector(MockConnector(MockNode::new(5151)))
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error.downcast_ref::<ConfigError>(), Some(ConfigError::NoAccounts)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_still_drains() {
        let node = MockNode::new(5151);
        node.include_all_at(Some(3));
        node.insert_block(3, Utc::now().timestamp() as u64 + 2);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let report = Bench::new(config(5151).with_workers(1), vec![PrivateKeySigner::random()])
            .with_connector(MockConnector(node))
            .run(shutdown)
            .await
            .unwrap();

        assert_eq!(report.injectors[0].submitted, 0);
        assert_eq!(report.summary.submitted, 0);
        assert_eq!(report.injectors[0].state, InjectorState::Done);
    }

    /// Reports a backlog far above any ceiling used here.
    struct Saturated;

    #[async_trait]
    impl UnconfirmedSource for Saturated {
        async fn unconfirmed(&self) -> Result<UnconfirmedTxs, AdmissionError> {
            Ok(UnconfirmedTxs { n_txs: 100, total: 50_000, total_bytes: 0 })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_source_gates_admission() {
        let node = MockNode::new(5151);

        let report = Bench::new(config(5151).with_workers(1), vec![PrivateKeySigner::random()])
            .with_connector(MockConnector(node.clone()))
            .with_unconfirmed_source(Arc::new(Saturated))
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.injectors[0].state, InjectorState::Done);
        assert_eq!(report.injectors[0].cycles, 3);
        assert_eq!(report.summary.submitted, 0);
        assert!(node.submitted().is_empty());
        assert_eq!(node.pool_queries(), 3);
    }
}
