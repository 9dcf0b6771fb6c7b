//! JSON-RPC over a single persistent websocket.
//!
//! [`WsSession`] owns the connection and its liveness deadline, [`RpcClient`]
//! layers typed request/response correlation on top of any [`Transport`].

mod client;
pub use client::{
    BlockByNumber, ChainIdRequest, PoolStatusRequest, RpcClient, RpcRequest, SendRawTransaction,
    TransactionByHash, TransactionCount,
};

mod method;
pub use method::Method;

mod session;
pub use session::{SessionOptions, Transport, WsSession};

mod types;
pub use types::{
    BlockSummary, BlockTag, JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    PoolStatus, RpcBlock, RpcTransaction,
};
