//! Error types for the benchmark pipeline.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::{AccountId, transport::Method};

/// Messages a node returns when it already holds the submitted transaction.
const ALREADY_KNOWN: [&str; 2] = ["already known", "known transaction"];

/// Failures of the websocket connection itself. Recovered by reconnecting.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dialing the endpoint failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint that was dialed.
        endpoint: String,
        /// Underlying websocket error.
        #[source]
        source: Box<tungstenite::Error>,
    },
    /// Writing a frame failed.
    #[error("websocket write failed: {0}")]
    Write(#[source] Box<tungstenite::Error>),
    /// Reading a frame failed.
    #[error("websocket read failed: {0}")]
    Read(#[source] Box<tungstenite::Error>),
    /// No frame moved within the idle deadline.
    #[error("no activity for {0:?}")]
    Timeout(Duration),
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
    /// The session has no live connection.
    #[error("session is disconnected")]
    Disconnected,
    /// A request frame could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A frame arrived but its content is not what the request class expects.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a JSON-RPC response.
    #[error("malformed response frame: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The result payload does not match the expected shape.
    #[error("failed to decode {method} result: {source}")]
    Decode {
        /// Request class being decoded.
        method: Method,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The node answered with neither a result nor an error.
    #[error("{method} returned an empty result")]
    MissingResult {
        /// Request class being decoded.
        method: Method,
    },
}

/// An error object returned by the node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("node rejected request ({code}): {message}")]
pub struct RpcRejection {
    /// JSON-RPC error code.
    pub code: i64,
    /// Error message.
    pub message: String,
}

impl RpcRejection {
    /// Whether the node reports it already holds the transaction.
    pub fn is_already_known(&self) -> bool {
        let message = self.message.to_ascii_lowercase();
        ALREADY_KNOWN.iter().any(|known| message.contains(known))
    }
}

/// Outcome of a failed request/response exchange.
#[derive(Debug, Error)]
pub enum CallError {
    /// Connection-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Unexpected response content.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The node refused the request.
    #[error(transparent)]
    Rejected(#[from] RpcRejection),
}

impl CallError {
    /// Whether recovering requires a fresh connection.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Invalid startup configuration. Aborts the run before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A private key could not be parsed.
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    /// An endpoint URL is unusable.
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint {
        /// Offending URL.
        url: String,
        /// Why it was refused.
        reason: String,
    },
    /// The node serves a different chain than configured.
    #[error("chain id mismatch: configured {expected}, node reports {actual}")]
    ChainIdMismatch {
        /// Configured chain id.
        expected: u64,
        /// Chain id reported by the node.
        actual: u64,
    },
    /// No signing accounts were supplied.
    #[error("no accounts configured")]
    NoAccounts,
    /// The endpoint could not be reached at startup.
    #[error("endpoint {endpoint} unreachable: {source}")]
    Unreachable {
        /// Endpoint that failed.
        endpoint: String,
        /// Underlying failure.
        #[source]
        source: CallError,
    },
    /// Any other out-of-range setting.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Building or signing a transaction failed.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The signer refused the payload.
    #[error("failed to sign transaction: {0}")]
    Signer(#[from] alloy_signer::Error),
}

/// Ledger lookups for an account that is not held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The account id is not part of this ledger.
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),
}

/// Reading the pending-pool signal failed.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The auxiliary HTTP endpoint failed.
    #[error("unconfirmed tx query failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The auxiliary payload had an unexpected shape.
    #[error("malformed unconfirmed tx payload: {0}")]
    Malformed(String),
}

/// Terminal failure of an injector worker.
#[derive(Debug, Error)]
pub enum InjectorError {
    /// A step kept failing after every reconnect.
    #[error("{step} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Step that failed.
        step: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        source: CallError,
    },
    /// Ledger bookkeeping failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The downstream record channel is gone.
    #[error("record channel closed")]
    ChannelClosed,
}

/// Key file or funding failures.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Reading or writing the key file failed.
    #[error("key file {path}: {source}")]
    Io {
        /// Key file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A line of the key file is not a private key.
    #[error("key file line {line}: {reason}")]
    InvalidKey {
        /// One-based line number.
        line: usize,
        /// Parse failure.
        reason: String,
    },
    /// A funding request failed.
    #[error(transparent)]
    Call(#[from] CallError),
    /// Signing a funding transfer failed.
    #[error(transparent)]
    Signing(#[from] SigningError),
    /// A funding transfer was not included in time.
    #[error("funding transfer {0} was not included in time")]
    NotIncluded(alloy_primitives::B256),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::geth("already known", true)]
    #[case::reth("Transaction already known", true)]
    #[case::parity("Known transaction (1d2a)", true)]
    #[case::nonce("nonce too low", false)]
    #[case::underpriced("replacement transaction underpriced", false)]
    fn already_known(#[case] message: &str, #[case] expected: bool) {
        let rejection = RpcRejection { code: -32000, message: message.to_string() };
        assert_eq!(rejection.is_already_known(), expected);
    }

    #[test]
    fn transport_classification() {
        assert!(CallError::from(TransportError::Closed).is_transport());
        assert!(
            !CallError::from(RpcRejection { code: -32000, message: "x".into() }).is_transport()
        );
    }
}
