//! Benchmark configuration.

use std::time::Duration;

use alloy_primitives::{Address, U256, address};
use url::Url;

use crate::{ConfigError, TransferRequest, transport::SessionOptions};

/// Default transfer recipient.
pub const DEFAULT_RECIPIENT: Address = address!("0xb83782c315090b826c670f8a354a9dc3b4942ebf");

/// Shape of every benchmark transfer; only the nonce varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTemplate {
    /// Recipient.
    pub to: Address,
    /// Amount in wei.
    pub value: U256,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas price in wei.
    pub gas_price: u128,
}

impl Default for TransferTemplate {
    fn default() -> Self {
        Self {
            to: DEFAULT_RECIPIENT,
            value: U256::from(1_000_000_000u64),
            gas_limit: 42_000,
            gas_price: 100,
        }
    }
}

impl TransferTemplate {
    /// The transfer for `nonce` on `chain_id`.
    pub const fn request(&self, nonce: u64, chain_id: u64) -> TransferRequest {
        TransferRequest {
            nonce,
            to: self.to,
            value: self.value,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
            chain_id,
        }
    }
}

/// Settings for one injector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectorConfig {
    /// Chain id used for signing.
    pub chain_id: u64,
    /// Pending-pool size above which no more transactions are admitted.
    pub ceiling: u64,
    /// Largest number of transactions submitted per cycle.
    pub burst_size: u64,
    /// Pause between cycles.
    pub poll_interval: Duration,
    /// Total time to keep injecting.
    pub duration: Duration,
    /// Reconnect-and-retry budget per step.
    pub max_transport_retries: u32,
    /// Transfer shape.
    pub transfer: TransferTemplate,
}

/// Settings for one confirmation tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Delay before a record that was not yet included is looked up again.
    pub retry_backoff: Duration,
    /// Lookups per record before it is abandoned.
    pub max_attempts: u32,
    /// Records waiting for a retry; while full no new records are pulled.
    pub queue_capacity: usize,
    /// Blocks kept in the block cache.
    pub block_cache_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(1),
            max_attempts: 60,
            queue_capacity: 10_000,
            block_cache_size: 1_024,
        }
    }
}

/// Configuration of a whole benchmark run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    /// Websocket endpoints; worker `i` uses `endpoints[i % len]`.
    pub endpoints: Vec<Url>,
    /// Base URL serving `/num_unconfirmed_txs`.
    pub metrics_url: Option<Url>,
    /// Expected chain id.
    pub chain_id: u64,
    /// Injector/tracker pairs.
    pub workers: usize,
    /// Pending-pool admission ceiling.
    pub ceiling: u64,
    /// Injection duration.
    pub duration: Duration,
    /// Transactions per burst.
    pub burst_size: u64,
    /// Pause between bursts.
    pub poll_interval: Duration,
    /// Cadence of aggregator reports.
    pub report_interval: Duration,
    /// Websocket idle deadline.
    pub idle_timeout: Duration,
    /// Reconnect-and-retry budget per step.
    pub max_transport_retries: u32,
    /// Transfer shape.
    pub transfer: TransferTemplate,
    /// Tracker settings.
    pub tracker: TrackerConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            metrics_url: None,
            chain_id: 5151,
            workers: 1,
            ceiling: 7_000,
            duration: Duration::from_secs(120),
            burst_size: 400,
            poll_interval: Duration::from_secs(1),
            report_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(120),
            max_transport_retries: 5,
            transfer: TransferTemplate::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl BenchConfig {
    /// Adds a websocket endpoint.
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Sets the auxiliary metrics URL.
    pub fn with_metrics_url(mut self, url: Option<Url>) -> Self {
        self.metrics_url = url;
        self
    }

    /// Sets the expected chain id.
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Sets the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the admission ceiling.
    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Sets the injection duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the burst size.
    pub fn with_burst_size(mut self, burst_size: u64) -> Self {
        self.burst_size = burst_size;
        self
    }

    /// Sets the pause between bursts.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the report cadence.
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Sets the websocket idle deadline.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the transport retry budget.
    pub fn with_max_transport_retries(mut self, retries: u32) -> Self {
        self.max_transport_retries = retries;
        self
    }

    /// Sets the transfer shape.
    pub fn with_transfer(mut self, transfer: TransferTemplate) -> Self {
        self.transfer = transfer;
        self
    }

    /// Sets the tracker settings.
    pub fn with_tracker(mut self, tracker: TrackerConfig) -> Self {
        self.tracker = tracker;
        self
    }

    /// Capacity of each record channel.
    pub fn channel_capacity(&self) -> usize {
        (self.burst_size as usize).saturating_mul(2).max(1)
    }

    /// Endpoint assigned to `worker`.
    pub fn endpoint_for(&self, worker: usize) -> Option<&Url> {
        if self.endpoints.is_empty() {
            return None;
        }
        self.endpoints.get(worker % self.endpoints.len())
    }

    /// Settings for the injectors.
    pub const fn injector(&self) -> InjectorConfig {
        InjectorConfig {
            chain_id: self.chain_id,
            ceiling: self.ceiling,
            burst_size: self.burst_size,
            poll_interval: self.poll_interval,
            duration: self.duration,
            max_transport_retries: self.max_transport_retries,
            transfer: self.transfer,
        }
    }

    /// Session deadlines and reconnect pacing.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions::default().with_idle_timeout(self.idle_timeout)
    }

    /// Checks every setting that can be checked without the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid("at least one endpoint is required".into()));
        }
        for endpoint in &self.endpoints {
            if !matches!(endpoint.scheme(), "ws" | "wss") {
                return Err(ConfigError::InvalidEndpoint {
                    url: endpoint.to_string(),
                    reason: "expected a ws:// or wss:// URL".into(),
                });
            }
        }
        if let Some(url) = &self.metrics_url {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidEndpoint {
                    url: url.to_string(),
                    reason: "expected an http:// or https:// URL".into(),
                });
            }
        }

        let checks = [
            (self.workers == 0, "workers must be at least 1"),
            (self.burst_size == 0, "burst size must be at least 1"),
            (self.duration.is_zero(), "duration must be positive"),
            (self.poll_interval.is_zero(), "poll interval must be positive"),
            (self.report_interval.is_zero(), "report interval must be positive"),
            (self.idle_timeout.is_zero(), "idle timeout must be positive"),
            (self.tracker.max_attempts == 0, "tracker max attempts must be at least 1"),
            (self.tracker.queue_capacity == 0, "tracker queue capacity must be at least 1"),
        ];
        match checks.into_iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(ConfigError::Invalid(reason.into())),
            None => Ok(()),
        }
    }
}
