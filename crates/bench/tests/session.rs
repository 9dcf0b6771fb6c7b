//! `WsSession` against a real websocket server.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use evm_bench::{
    CallError, TransportError,
    transport::{BlockTag, ChainIdRequest, RpcClient, SessionOptions, WsSession},
};
use evm_bench_cli_utils::init_test_tracing;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Answer,
    /// The first connection closes right after its first response.
    DropFirstConnection,
    Silent,
}

struct MockServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl MockServer {
    async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = connections.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let index = counter.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(Self::serve(stream, behavior, index));
                    }
                }
            }
        });

        Self { addr, connections, shutdown }
    }

    fn url(&self) -> Url {
        Url::parse(&format!("ws://{}", self.addr)).unwrap()
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    async fn serve(stream: TcpStream, behavior: Behavior, index: usize) {
        let Ok(mut ws) = accept_async(stream).await else { return };

        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else { continue };
            if behavior == Behavior::Silent {
                continue;
            }

            let request: Value = serde_json::from_str(text.as_str()).unwrap();
            let id = request["id"].clone();
            let reply = match request["method"].as_str() {
                Some("eth_chainId") => json!({ "jsonrpc": "2.0", "id": id, "result": "0x141f" }),
                Some("eth_getTransactionCount") => {
                    json!({ "jsonrpc": "2.0", "id": id, "result": "0x5" })
                }
                Some("txpool_status") => {
                    let body = json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": { "pending": "0x1", "queued": "0x2" },
                    });
                    let payload = serde_json::to_vec(&body).unwrap();
                    if ws.send(Message::Binary(payload.into())).await.is_err() {
                        return;
                    }
                    continue;
                }
                _ => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": "method not found" },
                }),
            };

            if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                return;
            }
            if behavior == Behavior::DropFirstConnection && index == 0 {
                let _ = ws.close(None).await;
                return;
            }
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn options() -> SessionOptions {
    SessionOptions::default()
        .with_idle_timeout(Duration::from_secs(2))
        .with_reconnect_max_elapsed(Duration::from_secs(5))
}

#[tokio::test]
async fn answers_every_request_class() {
    init_test_tracing();
    let server = MockServer::start(Behavior::Answer).await;
    let session = WsSession::connect(server.url(), options()).await.unwrap();
    assert!(session.is_connected());
    let mut client = RpcClient::new(session);

    assert_eq!(client.chain_id().await.unwrap(), 5151);
    let address = "0x0000000000000000000000000000000000000011".parse().unwrap();
    assert_eq!(client.transaction_count(address, BlockTag::Pending).await.unwrap(), 5);

    let pool = client.pool_status().await.unwrap();
    assert_eq!(pool.pending.to::<u64>(), 1);
    assert_eq!(pool.queued.to::<u64>(), 2);

    let rejected = client.transaction_by_hash(Default::default()).await.unwrap_err();
    assert!(matches!(rejected, CallError::Rejected(ref r) if r.code == -32601));

    client.close().await;
    assert!(!client.transport().is_connected());
}

#[tokio::test]
async fn recovers_after_server_drop() {
    init_test_tracing();
    let server = MockServer::start(Behavior::DropFirstConnection).await;
    let session = WsSession::connect(server.url(), options()).await.unwrap();
    let mut client = RpcClient::new(session);

    assert_eq!(client.chain_id().await.unwrap(), 5151);

    let chain_id = client.call_with_recovery(&ChainIdRequest, 3).await.unwrap();
    assert_eq!(chain_id, 5151);
    assert_eq!(client.reconnects(), 1);
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn silent_peer_times_out() {
    let server = MockServer::start(Behavior::Silent).await;
    let options = options().with_idle_timeout(Duration::from_millis(200));
    let mut client = RpcClient::new(WsSession::connect(server.url(), options).await.unwrap());

    let error = client.chain_id().await.unwrap_err();
    assert!(matches!(error, CallError::Transport(TransportError::Timeout(_))));
}
