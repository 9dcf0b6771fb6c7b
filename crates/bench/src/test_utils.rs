//! In-memory node and transport for exercising the pipeline without a network.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use alloy_consensus::{Transaction, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{Address, B256, Bytes, U64, keccak256};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::{
    CallError, ProtocolError, TransportError,
    transport::{JsonRpcResponse, Method, Transport},
};

#[derive(Debug, Default)]
struct NodeState {
    chain_id: u64,
    nonces: HashMap<Address, u64>,
    pending: u64,
    queued: u64,
    submitted: Vec<Bytes>,
    known: HashSet<B256>,
    rejections: VecDeque<(i64, String)>,
    receive_failures: u32,
    lose_ack_at: Option<usize>,
    lost_ack: bool,
    garble_ack_at: Option<usize>,
    garbled_ack: bool,
    inclusion_scripts: HashMap<B256, VecDeque<Option<u64>>>,
    default_inclusion: Option<u64>,
    blocks: HashMap<u64, (u64, B256)>,
    tx_lookups: HashMap<B256, u32>,
    block_lookups: u32,
    pool_queries: u32,
    reconnects: u32,
}

/// A scripted node shared by any number of [`ScriptedTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct MockNode(Arc<Mutex<NodeState>>);

impl MockNode {
    /// A node serving `chain_id` with an empty pool.
    pub fn new(chain_id: u64) -> Self {
        let node = Self::default();
        node.0.lock().chain_id = chain_id;
        node
    }

    /// Pending nonce reported for `address`.
    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.0.lock().nonces.insert(address, nonce);
    }

    /// Counts reported by `txpool_status`.
    pub fn set_pool(&self, pending: u64, queued: u64) {
        let mut state = self.0.lock();
        state.pending = pending;
        state.queued = queued;
    }

    /// The next raw submission is answered with an error object.
    pub fn reject_next_submission(&self, code: i64, message: &str) {
        self.0.lock().rejections.push_back((code, message.to_string()));
    }

    /// The next `count` receives fail as if the peer closed the connection.
    pub fn fail_next_receives(&self, count: u32) {
        self.0.lock().receive_failures += count;
    }

    /// The acknowledgement of the `index`-th accepted submission (zero based)
    /// is lost, as if the connection dropped right after the node took it.
    pub fn lose_ack_of_submission(&self, index: usize) {
        self.0.lock().lose_ack_at = Some(index);
    }

    /// The acknowledgement of the `index`-th accepted submission is preceded
    /// by a garbled frame. The real acknowledgement stays queued behind it.
    pub fn garble_ack_of_submission(&self, index: usize) {
        self.0.lock().garble_ack_at = Some(index);
    }

    /// Results of successive lookups of `hash`: `None` is not yet included,
    /// `Some(n)` is included in block `n`. The last entry repeats.
    pub fn script_inclusion(&self, hash: B256, lookups: Vec<Option<u64>>) {
        self.0.lock().inclusion_scripts.insert(hash, lookups.into());
    }

    /// Block that every accepted, unscripted transaction is reported in.
    pub fn include_all_at(&self, block: Option<u64>) {
        self.0.lock().default_inclusion = block;
    }

    /// Makes block `number` available.
    pub fn insert_block(&self, number: u64, timestamp: u64) {
        let hash = keccak256(number.to_be_bytes());
        self.0.lock().blocks.insert(number, (timestamp, hash));
    }

    /// Raw transactions accepted so far, in order.
    pub fn submitted(&self) -> Vec<Bytes> {
        self.0.lock().submitted.clone()
    }

    /// Hashes of accepted transactions, in order.
    pub fn submitted_hashes(&self) -> Vec<B256> {
        self.submitted().iter().map(keccak256).collect()
    }

    /// Sender nonce of every accepted transaction, in order.
    pub fn submitted_nonces(&self) -> Vec<u64> {
        self.submitted()
            .iter()
            .filter_map(|raw| TxEnvelope::decode_2718(&mut raw.as_ref()).ok())
            .map(|tx| tx.nonce())
            .collect()
    }

    /// Lookups made for `hash`.
    pub fn tx_lookups(&self, hash: B256) -> u32 {
        self.0.lock().tx_lookups.get(&hash).copied().unwrap_or_default()
    }

    /// Block lookups made.
    pub fn block_lookups(&self) -> u32 {
        self.0.lock().block_lookups
    }

    /// `txpool_status` queries served.
    pub fn pool_queries(&self) -> u32 {
        self.0.lock().pool_queries
    }

    /// Reconnects performed against this node.
    pub fn reconnects(&self) -> u32 {
        self.0.lock().reconnects
    }

    fn handle(&self, method: Method, params: &Value) -> Option<JsonRpcResponse> {
        let mut guard = self.0.lock();
        let state = &mut *guard;
        let id = method.id();
        let response = match method {
            Method::GetChainId => JsonRpcResponse::success(id, json!(U64::from(state.chain_id))),
            Method::PoolStatus => {
                state.pool_queries += 1;
                JsonRpcResponse::success(
                    id,
                    json!({ "pending": U64::from(state.pending), "queued": U64::from(state.queued) }),
                )
            }
            Method::GetNonce => {
                let address: Address = serde_json::from_value(params[0].clone()).ok()?;
                let nonce = state.nonces.get(&address).copied().unwrap_or_default();
                JsonRpcResponse::success(id, json!(U64::from(nonce)))
            }
            Method::SubmitRawTx => {
                let raw: Bytes = serde_json::from_value(params[0].clone()).ok()?;
                if let Some((code, message)) = state.rejections.pop_front() {
                    return Some(JsonRpcResponse::failure(id, code, message));
                }
                let hash = keccak256(&raw);
                if !state.known.insert(hash) {
                    return Some(JsonRpcResponse::failure(id, -32000, "already known"));
                }
                state.submitted.push(raw);
                if state.lose_ack_at == Some(state.submitted.len() - 1) {
                    state.lose_ack_at = None;
                    state.lost_ack = true;
                    return None;
                }
                if state.garble_ack_at == Some(state.submitted.len() - 1) {
                    state.garble_ack_at = None;
                    state.garbled_ack = true;
                }
                JsonRpcResponse::success(id, json!(hash))
            }
            Method::GetTxByHash => {
                let hash: B256 = serde_json::from_value(params[0].clone()).ok()?;
                *state.tx_lookups.entry(hash).or_default() += 1;
                let inclusion = match state.inclusion_scripts.get_mut(&hash) {
                    Some(script) if script.len() > 1 => script.pop_front().flatten(),
                    Some(script) => script.front().copied().flatten(),
                    None if state.known.contains(&hash) => state.default_inclusion,
                    None => None,
                };
                let result = match inclusion {
                    Some(block) => json!({
                        "hash": hash,
                        "nonce": U64::ZERO,
                        "blockHash": keccak256(block.to_be_bytes()),
                        "blockNumber": U64::from(block),
                    }),
                    None if state.known.contains(&hash) => json!({
                        "hash": hash,
                        "nonce": U64::ZERO,
                        "blockHash": null,
                        "blockNumber": null,
                    }),
                    None => Value::Null,
                };
                JsonRpcResponse::success(id, result)
            }
            Method::GetBlockByNumber => {
                state.block_lookups += 1;
                let number = params[0]
                    .as_str()
                    .and_then(|hex| u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok())?;
                let result = match state.blocks.get(&number) {
                    Some((timestamp, hash)) => json!({
                        "number": U64::from(number),
                        "timestamp": U64::from(*timestamp),
                        "hash": hash,
                    }),
                    None => Value::Null,
                };
                JsonRpcResponse::success(id, result)
            }
        };
        Some(response)
    }

    fn take_garbled_frame(&self) -> bool {
        std::mem::take(&mut self.0.lock().garbled_ack)
    }

    fn take_receive_failure(&self) -> bool {
        let mut state = self.0.lock();
        if state.lost_ack {
            state.lost_ack = false;
            return true;
        }
        if state.receive_failures > 0 {
            state.receive_failures -= 1;
            return true;
        }
        false
    }
}

/// A [`Transport`] answering from a [`MockNode`].
#[derive(Debug)]
pub struct ScriptedTransport {
    node: MockNode,
    inbox: VecDeque<JsonRpcResponse>,
    connected: bool,
}

impl ScriptedTransport {
    /// A connected transport to `node`.
    pub fn new(node: MockNode) -> Self {
        Self { node, inbox: VecDeque::new(), connected: true }
    }

    /// Queues a frame ahead of any response.
    pub fn push_frame(&mut self, frame: JsonRpcResponse) {
        self.inbox.push_back(frame);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, method: Method, params: Value) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        if let Some(response) = self.node.handle(method, &params) {
            self.inbox.push_back(response);
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<JsonRpcResponse, CallError> {
        if !self.connected {
            return Err(TransportError::Disconnected.into());
        }
        if self.node.take_receive_failure() {
            self.connected = false;
            self.inbox.clear();
            return Err(TransportError::Closed.into());
        }
        if self.node.take_garbled_frame() {
            return serde_json::from_slice(b"{\"jsonrpc\":\"2.0\",\"id\"")
                .map_err(|e| CallError::Protocol(ProtocolError::Malformed(e)));
        }
        self.inbox.pop_front().ok_or(TransportError::Timeout(Duration::ZERO).into())
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.node.0.lock().reconnects += 1;
        self.inbox.clear();
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.connected = false;
    }
}
