use alloy_primitives::{Address, B256, Bytes, U64};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{BlockSummary, BlockTag, Method, PoolStatus, RpcBlock, RpcTransaction, Transport};
use crate::{CallError, ProtocolError, RpcRejection, TransportError};

/// A typed request with its own response-decoding contract.
pub trait RpcRequest {
    /// Request class, which also fixes the correlation id.
    const METHOD: Method;
    /// Decoded result.
    type Output;

    /// Positional parameters.
    fn params(&self) -> Value;

    /// Decodes the `result` member. `None` is a JSON `null` or a missing result.
    fn decode(result: Option<Value>) -> Result<Self::Output, ProtocolError>;
}

fn required<T: DeserializeOwned>(method: Method, result: Option<Value>) -> Result<T, ProtocolError> {
    match result {
        Some(value) => serde_json::from_value(value)
            .map_err(|source| ProtocolError::Decode { method, source }),
        None => Err(ProtocolError::MissingResult { method }),
    }
}

fn optional<T: DeserializeOwned>(
    method: Method,
    result: Option<Value>,
) -> Result<Option<T>, ProtocolError> {
    result
        .map(|value| serde_json::from_value(value))
        .transpose()
        .map_err(|source| ProtocolError::Decode { method, source })
}

/// `txpool_status`
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStatusRequest;

impl RpcRequest for PoolStatusRequest {
    const METHOD: Method = Method::PoolStatus;
    type Output = PoolStatus;

    fn params(&self) -> Value {
        json!([])
    }

    fn decode(result: Option<Value>) -> Result<PoolStatus, ProtocolError> {
        required(Self::METHOD, result)
    }
}

/// `eth_sendRawTransaction`, resolving to the node-assigned hash.
#[derive(Debug, Clone)]
pub struct SendRawTransaction(pub Bytes);

impl RpcRequest for SendRawTransaction {
    const METHOD: Method = Method::SubmitRawTx;
    type Output = B256;

    fn params(&self) -> Value {
        json!([self.0])
    }

    fn decode(result: Option<Value>) -> Result<B256, ProtocolError> {
        required(Self::METHOD, result)
    }
}

/// `eth_getTransactionCount`
#[derive(Debug, Clone, Copy)]
pub struct TransactionCount {
    /// Account queried.
    pub address: Address,
    /// Block view.
    pub tag: BlockTag,
}

impl RpcRequest for TransactionCount {
    const METHOD: Method = Method::GetNonce;
    type Output = u64;

    fn params(&self) -> Value {
        json!([self.address, self.tag.to_string()])
    }

    fn decode(result: Option<Value>) -> Result<u64, ProtocolError> {
        required::<U64>(Self::METHOD, result).map(|nonce| nonce.to())
    }
}

/// `eth_chainId`
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainIdRequest;

impl RpcRequest for ChainIdRequest {
    const METHOD: Method = Method::GetChainId;
    type Output = u64;

    fn params(&self) -> Value {
        json!([])
    }

    fn decode(result: Option<Value>) -> Result<u64, ProtocolError> {
        required::<U64>(Self::METHOD, result).map(|id| id.to())
    }
}

/// `eth_getTransactionByHash`, `None` while the node does not know the hash.
#[derive(Debug, Clone, Copy)]
pub struct TransactionByHash(pub B256);

impl RpcRequest for TransactionByHash {
    const METHOD: Method = Method::GetTxByHash;
    type Output = Option<RpcTransaction>;

    fn params(&self) -> Value {
        json!([self.0])
    }

    fn decode(result: Option<Value>) -> Result<Option<RpcTransaction>, ProtocolError> {
        optional(Self::METHOD, result)
    }
}

/// `eth_getBlockByNumber` without transaction bodies, `None` beyond the head.
#[derive(Debug, Clone, Copy)]
pub struct BlockByNumber(pub u64);

impl RpcRequest for BlockByNumber {
    const METHOD: Method = Method::GetBlockByNumber;
    type Output = Option<BlockSummary>;

    fn params(&self) -> Value {
        json!([format!("{:#x}", self.0), false])
    }

    fn decode(result: Option<Value>) -> Result<Option<BlockSummary>, ProtocolError> {
        optional::<RpcBlock>(Self::METHOD, result).map(|block| block.map(Into::into))
    }
}

/// Issues typed requests over a [`Transport`], one outstanding request at a time.
#[derive(Debug)]
pub struct RpcClient<T> {
    transport: T,
    reconnects: u64,
}

impl<T: Transport> RpcClient<T> {
    /// Wraps a connected transport.
    pub const fn new(transport: T) -> Self {
        Self { transport, reconnects: 0 }
    }

    /// Number of reconnects performed through this client.
    pub const fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `request` and waits for the response carrying its id.
    ///
    /// Responses with any other id are stale answers to an earlier, abandoned
    /// exchange and are discarded.
    pub async fn call<R: RpcRequest + Sync>(&mut self, request: &R) -> Result<R::Output, CallError> {
        self.transport.send(R::METHOD, request.params()).await?;

        loop {
            let response = self.transport.receive().await?;
            if response.id != Some(R::METHOD.id()) {
                warn!(expected = %R::METHOD, id = ?response.id, "discarding stray response");
                continue;
            }

            if let Some(error) = response.error {
                return Err(RpcRejection { code: error.code, message: error.message }.into());
            }
            return R::decode(response.result).map_err(Into::into);
        }
    }

    /// Like [`Self::call`], reconnecting after transport failures and retrying
    /// transport and protocol failures up to `max_retries` times. Rejections are
    /// returned immediately.
    pub async fn call_with_recovery<R: RpcRequest + Sync>(
        &mut self,
        request: &R,
        max_retries: u32,
    ) -> Result<R::Output, CallError> {
        let mut attempt = 0;
        loop {
            match self.call(request).await {
                Ok(output) => return Ok(output),
                Err(error @ CallError::Rejected(_)) => return Err(error),
                Err(error) if attempt < max_retries => {
                    attempt += 1;
                    warn!(method = %R::METHOD, attempt, error = %error, "rpc call failed, retrying");
                    if error.is_transport() {
                        if let Err(error) = self.reconnect().await {
                            warn!(method = %R::METHOD, error = %error, "reconnect failed");
                        }
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Tears down and re-dials the transport.
    pub async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.reconnects += 1;
        debug!(reconnects = self.reconnects, "reconnecting transport");
        self.transport.reconnect().await
    }

    /// Closes the transport.
    pub async fn close(&mut self) {
        self.transport.close().await;
    }

    /// `txpool_status`
    pub async fn pool_status(&mut self) -> Result<PoolStatus, CallError> {
        self.call(&PoolStatusRequest).await
    }

    /// `eth_chainId`
    pub async fn chain_id(&mut self) -> Result<u64, CallError> {
        self.call(&ChainIdRequest).await
    }

    /// `eth_getTransactionCount`
    pub async fn transaction_count(
        &mut self,
        address: Address,
        tag: BlockTag,
    ) -> Result<u64, CallError> {
        self.call(&TransactionCount { address, tag }).await
    }

    /// `eth_sendRawTransaction`
    pub async fn send_raw_transaction(&mut self, raw: Bytes) -> Result<B256, CallError> {
        self.call(&SendRawTransaction(raw)).await
    }

    /// `eth_getTransactionByHash`
    pub async fn transaction_by_hash(
        &mut self,
        hash: B256,
    ) -> Result<Option<RpcTransaction>, CallError> {
        self.call(&TransactionByHash(hash)).await
    }

    /// `eth_getBlockByNumber`
    pub async fn block_by_number(&mut self, number: u64) -> Result<Option<BlockSummary>, CallError> {
        self.call(&BlockByNumber(number)).await
    }
}
