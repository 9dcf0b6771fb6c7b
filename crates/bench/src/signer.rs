use std::fmt;

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

use crate::SigningError;

/// A value transfer to be signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    /// Sender nonce.
    pub nonce: u64,
    /// Recipient.
    pub to: Address,
    /// Amount in wei.
    pub value: U256,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas price in wei.
    pub gas_price: u128,
    /// Replay-protection chain id.
    pub chain_id: u64,
}

/// Turns a transfer into raw signed transaction bytes.
pub trait TxSigner: fmt::Debug + Send + Sync {
    /// Signs `request` with `key` and returns the EIP-2718 encoding.
    fn sign(&self, request: &TransferRequest, key: &PrivateKeySigner) -> Result<Bytes, SigningError>;
}

/// Signs EIP-155 legacy transfers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacySigner;

impl TxSigner for LegacySigner {
    fn sign(&self, request: &TransferRequest, key: &PrivateKeySigner) -> Result<Bytes, SigningError> {
        let tx = TxLegacy {
            chain_id: Some(request.chain_id),
            nonce: request.nonce,
            gas_price: request.gas_price,
            gas_limit: request.gas_limit,
            to: TxKind::Call(request.to),
            value: request.value,
            input: Bytes::new(),
        };

        let signature = key.sign_hash_sync(&tx.signature_hash())?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));
        Ok(envelope.encoded_2718().into())
    }
}
