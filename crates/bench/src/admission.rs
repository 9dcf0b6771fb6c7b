//! The pending-pool signal that gates each burst.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, de};
use tracing::{debug, warn};
use url::Url;

use crate::{
    AdmissionError, CallError, ConfigError,
    transport::{RpcClient, Transport},
};

const UNCONFIRMED_PATH: &str = "num_unconfirmed_txs";
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// An instantaneous, possibly stale, view of the node's pending pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingPoolSnapshot {
    /// Executable transactions reported by `txpool_status`.
    pub pending: u64,
    /// Nonce-gapped transactions reported by `txpool_status`.
    pub queued: u64,
    /// Total reported by the auxiliary HTTP endpoint.
    pub unconfirmed: Option<u64>,
}

impl PendingPoolSnapshot {
    /// The larger of the two pool views.
    pub fn observed_pending(&self) -> u64 {
        let pool = self.pending.saturating_add(self.queued);
        self.unconfirmed.map_or(pool, |total| pool.max(total))
    }

    /// How many transactions fit below `ceiling`.
    pub fn headroom(&self, ceiling: u64) -> u64 {
        ceiling.saturating_sub(self.observed_pending())
    }
}

/// `result` of `GET /num_unconfirmed_txs`. Counts arrive string-encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct UnconfirmedTxs {
    /// Transactions returned in this page.
    #[serde(deserialize_with = "string_or_number")]
    pub n_txs: u64,
    /// Total unconfirmed transactions.
    #[serde(deserialize_with = "string_or_number")]
    pub total: u64,
    /// Total size of unconfirmed transactions in bytes.
    #[serde(deserialize_with = "string_or_number")]
    pub total_bytes: u64,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    struct Visitor;

    impl de::Visitor<'_> for Visitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an unsigned integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(Visitor)
}

/// JSON-RPC envelope of the HTTP endpoint. Its id is `-1`, so it is not
/// correlated like websocket responses.
#[derive(Debug, Deserialize)]
struct UnconfirmedEnvelope {
    #[serde(default)]
    result: Option<UnconfirmedTxs>,
}

/// A source of the auxiliary unconfirmed-transaction count.
#[async_trait]
pub trait UnconfirmedSource: Send + Sync {
    /// Fetches the current counts.
    async fn unconfirmed(&self) -> Result<UnconfirmedTxs, AdmissionError>;
}

/// Reads `{base}/num_unconfirmed_txs` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpUnconfirmedSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpUnconfirmedSource {
    /// Targets the node metrics endpoint at `base`.
    pub fn new(base: &Url) -> Result<Self, ConfigError> {
        let raw = format!("{}/{UNCONFIRMED_PATH}", base.as_str().trim_end_matches('/'));
        let url = Url::parse(&raw)
            .map_err(|e| ConfigError::InvalidEndpoint { url: raw, reason: e.to_string() })?;
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        Ok(Self { client, url })
    }

    /// Full URL queried.
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl UnconfirmedSource for HttpUnconfirmedSource {
    async fn unconfirmed(&self) -> Result<UnconfirmedTxs, AdmissionError> {
        let body = self.client.get(self.url.clone()).send().await?.error_for_status()?.bytes().await?;
        let envelope: UnconfirmedEnvelope =
            serde_json::from_slice(&body).map_err(|e| AdmissionError::Malformed(e.to_string()))?;
        envelope.result.ok_or_else(|| AdmissionError::Malformed("missing result".to_string()))
    }
}

/// Combines `txpool_status` with the optional auxiliary count.
#[derive(Clone, Default)]
pub struct AdmissionSignal {
    unconfirmed: Option<Arc<dyn UnconfirmedSource>>,
}

impl fmt::Debug for AdmissionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionSignal").field("unconfirmed", &self.unconfirmed.is_some()).finish()
    }
}

impl AdmissionSignal {
    /// A signal using `txpool_status` and, when given, the auxiliary source.
    pub fn new(unconfirmed: Option<Arc<dyn UnconfirmedSource>>) -> Self {
        Self { unconfirmed }
    }

    /// Takes a snapshot. Pool status failures propagate so the caller can
    /// reconnect; an auxiliary failure only drops that half of the signal.
    pub async fn snapshot<T: Transport>(
        &self,
        client: &mut RpcClient<T>,
    ) -> Result<PendingPoolSnapshot, CallError> {
        let status = client.pool_status().await?;

        let unconfirmed = match &self.unconfirmed {
            Some(source) => match source.unconfirmed().await {
                Ok(txs) => Some(txs.total),
                Err(error) => {
                    warn!(error = %error, "unconfirmed tx query failed, using pool status only");
                    None
                }
            },
            None => None,
        };

        let snapshot = PendingPoolSnapshot {
            pending: status.pending.to(),
            queued: status.queued.to(),
            unconfirmed,
        };
        debug!(
            pending = snapshot.pending,
            queued = snapshot.queued,
            unconfirmed = ?snapshot.unconfirmed,
            "pool snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::test_utils::{MockNode, ScriptedTransport};

    #[rstest]
    #[case::pool_only(450, 0, None, 450, 50)]
    #[case::queued_counts(400, 60, None, 460, 40)]
    #[case::http_larger(100, 0, Some(480), 480, 20)]
    #[case::http_smaller(490, 0, Some(10), 490, 10)]
    #[case::over_ceiling(600, 0, None, 600, 0)]
    fn headroom(
        #[case] pending: u64,
        #[case] queued: u64,
        #[case] unconfirmed: Option<u64>,
        #[case] observed: u64,
        #[case] room: u64,
    ) {
        let snapshot = PendingPoolSnapshot { pending, queued, unconfirmed };
        assert_eq!(snapshot.observed_pending(), observed);
        assert_eq!(snapshot.headroom(500), room);
    }

    #[test]
    fn unconfirmed_txs_accepts_strings() {
        let txs: UnconfirmedTxs =
            serde_json::from_value(json!({ "n_txs": "30", "total": "7000", "total_bytes": 123 }))
                .unwrap();
        assert_eq!(txs, UnconfirmedTxs { n_txs: 30, total: 7_000, total_bytes: 123 });
        assert!(serde_json::from_value::<UnconfirmedTxs>(json!({ "n_txs": "x" })).is_err());
    }

    #[test]
    fn http_url_is_joined() {
        let base = Url::parse("http://127.0.0.1:26657/").unwrap();
        let source = HttpUnconfirmedSource::new(&base).unwrap();
        assert_eq!(source.url().as_str(), "http://127.0.0.1:26657/num_unconfirmed_txs");
    }

    struct Fixed(Option<u64>);

    #[async_trait]
    impl UnconfirmedSource for Fixed {
        async fn unconfirmed(&self) -> Result<UnconfirmedTxs, AdmissionError> {
            self.0
                .map(|total| UnconfirmedTxs { n_txs: 0, total, total_bytes: 0 })
                .ok_or_else(|| AdmissionError::Malformed("down".into()))
        }
    }

    #[rstest]
    #[case::reachable(Some(900), Some(900))]
    #[case::unreachable(None, None)]
    #[tokio::test]
    async fn snapshot_combines_sources(#[case] http: Option<u64>, #[case] expected: Option<u64>) {
        let node = MockNode::new(1);
        node.set_pool(120, 5);
        let mut client = RpcClient::new(ScriptedTransport::new(node));
        let signal = AdmissionSignal::new(Some(Arc::new(Fixed(http))));

        let snapshot = signal.snapshot(&mut client).await.unwrap();
        assert_eq!(snapshot.pending, 120);
        assert_eq!(snapshot.queued, 5);
        assert_eq!(snapshot.unconfirmed, expected);
    }

    /// Answers one HTTP request with `body` and returns the base URL.
    async fn serve_once(body: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request: Vec<u8> = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            assert!(request.starts_with(b"GET /num_unconfirmed_txs "));
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    #[tokio::test]
    async fn http_source_reads_string_counts() {
        let base = serve_once(
            r#"{"jsonrpc":"2.0","id":-1,"result":{"n_txs":"3","total":"700","total_bytes":"9"}}"#,
        )
        .await;
        let source = HttpUnconfirmedSource::new(&base).unwrap();

        let txs = source.unconfirmed().await.unwrap();
        assert_eq!(txs, UnconfirmedTxs { n_txs: 3, total: 700, total_bytes: 9 });
    }

    #[tokio::test]
    async fn http_source_without_result_falls_back_to_pool() {
        let base = serve_once(r#"{"jsonrpc":"2.0","id":-1}"#).await;
        let source = HttpUnconfirmedSource::new(&base).unwrap();
        assert!(matches!(source.unconfirmed().await, Err(AdmissionError::Malformed(_))));

        let base = serve_once(r#"{"jsonrpc":"2.0","id":-1}"#).await;
        let node = MockNode::new(1);
        node.set_pool(40, 2);
        let mut client = RpcClient::new(ScriptedTransport::new(node));
        let signal = AdmissionSignal::new(Some(Arc::new(HttpUnconfirmedSource::new(&base).unwrap())));

        let snapshot = signal.snapshot(&mut client).await.unwrap();
        assert_eq!(snapshot, PendingPoolSnapshot { pending: 40, queued: 2, unconfirmed: None });
    }
}
