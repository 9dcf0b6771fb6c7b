#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod admission;
pub use admission::{
    AdmissionSignal, HttpUnconfirmedSource, PendingPoolSnapshot, UnconfirmedSource,
    UnconfirmedTxs,
};

mod config;
pub use config::{BenchConfig, DEFAULT_RECIPIENT, InjectorConfig, TrackerConfig, TransferTemplate};

mod error;
pub use error::{
    AdmissionError, CallError, ConfigError, InjectorError, LedgerError, ProtocolError,
    ProvisionError, RpcRejection, SigningError, TransportError,
};

mod injector;
pub use injector::{Injector, InjectorReport, InjectorState, RecordSinks};

mod ledger;
pub use ledger::{Account, AccountId, AccountLedger};

mod metrics;
pub use metrics::BenchMetrics;

mod provision;
pub use provision::{FundOutcome, Funded, Funder, KeyFile, TransferFunder, parse_private_key};

mod record;
pub use record::{FailureReason, RecordStatus, SubmissionRecord, WorkerId, latency_between};

mod runner;
pub use runner::{Bench, BenchReport, Connector, WsConnector};

mod signer;
pub use signer::{LegacySigner, TransferRequest, TxSigner};

mod stats;
pub use stats::{AggregateStats, StatsAggregator, StatsReport, Summary, TpsEstimator};

mod tracker;
pub use tracker::{BlockCache, ConfirmationTracker, RetryEntry, RetryQueue, TrackerReport};

pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
