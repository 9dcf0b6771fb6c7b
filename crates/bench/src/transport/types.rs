//! JSON-RPC envelopes and the node payloads decoded from them.

use alloy_primitives::{B256, U64};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Method;

/// JSON-RPC protocol version sent with every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Positional parameters.
    pub params: Value,
    /// Correlation id.
    pub id: u64,
}

impl JsonRpcRequest {
    /// Builds the request frame for the given request class.
    pub fn new(method: Method, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.name().to_string(),
            params,
            id: method.id(),
        }
    }

    /// Request class this frame belongs to, if the id is known.
    pub fn method_kind(&self) -> Option<Method> {
        Method::from_id(self.id)
    }
}

/// A JSON-RPC response frame.
///
/// A `null` result deserializes to `None`; the per-request decoder decides whether
/// that means "not found" or a protocol violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version.
    #[serde(default)]
    pub jsonrpc: String,
    /// Correlation id, absent on notifications.
    #[serde(default)]
    pub id: Option<u64>,
    /// Result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object set by the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Successful response for `id`.
    pub fn success(id: u64, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), id: Some(id), result: Some(result), error: None }
    }

    /// Error response for `id`.
    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: None,
            error: Some(JsonRpcError { code, message: message.into() }),
        }
    }
}

/// Node-level error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
}

/// `txpool_status` result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Executable transactions.
    pub pending: U64,
    /// Transactions waiting on a nonce gap.
    pub queued: U64,
}

/// Subset of `eth_getTransactionByHash` used for inclusion lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Sender nonce.
    pub nonce: U64,
    /// Including block hash, `None` while pending.
    #[serde(default)]
    pub block_hash: Option<B256>,
    /// Including block number, `None` while pending.
    #[serde(default)]
    pub block_number: Option<U64>,
}

impl RpcTransaction {
    /// Block number the transaction was included in, if any.
    pub fn inclusion_block(&self) -> Option<u64> {
        match (self.block_hash, self.block_number) {
            (Some(_), Some(number)) => Some(number.to()),
            _ => None,
        }
    }
}

/// Subset of `eth_getBlockByNumber` used for latency computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcBlock {
    /// Block number.
    pub number: U64,
    /// Block timestamp in seconds.
    pub timestamp: U64,
    /// Block hash.
    pub hash: B256,
}

/// Minimal block metadata, immutable once observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSummary {
    /// Block number.
    pub number: u64,
    /// Block timestamp in seconds.
    pub timestamp: u64,
    /// Block hash.
    pub hash: B256,
}

impl From<RpcBlock> for BlockSummary {
    fn from(block: RpcBlock) -> Self {
        Self { number: block.number.to(), timestamp: block.timestamp.to(), hash: block.hash }
    }
}

/// Block view selector for nonce queries.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockTag {
    /// Includes transactions still in the pool.
    #[default]
    #[display("pending")]
    Pending,
    /// Only mined transactions.
    #[display("latest")]
    Latest,
}
