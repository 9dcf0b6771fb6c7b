//! Test account provisioning: key persistence and funding.

use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_primitives::{Address, B256, U256, keccak256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    CallError, ConfigError, LegacySigner, ProvisionError, TransferRequest, TxSigner,
    transport::{BlockTag, RpcClient, SendRawTransaction, TransactionByHash, TransactionCount, Transport},
};

/// Parses a hex private key, with or without `0x`.
pub fn parse_private_key(key: &str) -> Result<PrivateKeySigner, ConfigError> {
    key.trim().parse::<PrivateKeySigner>().map_err(|e| ConfigError::InvalidKey(e.to_string()))
}

/// A file of hex private keys, one per line. Blank lines and `#` comments are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFile {
    path: PathBuf,
}

impl KeyFile {
    /// Key file at `path`; it does not have to exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn contents(&self) -> Result<String, ProvisionError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(ProvisionError::Io { path: self.path.clone(), source }),
        }
    }

    /// Every key in the file; a missing file holds none.
    pub fn load(&self) -> Result<Vec<PrivateKeySigner>, ProvisionError> {
        Self::parse(&self.contents()?)
    }

    fn parse(contents: &str) -> Result<Vec<PrivateKeySigner>, ProvisionError> {
        contents
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .map(|(line, key)| {
                parse_private_key(key)
                    .map_err(|e| ProvisionError::InvalidKey { line, reason: e.to_string() })
            })
            .collect()
    }

    /// The first `count` keys, generating and appending fresh ones when the
    /// file holds fewer.
    pub fn provision(&self, count: usize) -> Result<Vec<PrivateKeySigner>, ProvisionError> {
        let contents = self.contents()?;
        let mut keys = Self::parse(&contents)?;
        if keys.len() >= count {
            keys.truncate(count);
            return Ok(keys);
        }

        let fresh: Vec<_> = (keys.len()..count).map(|_| PrivateKeySigner::random()).collect();
        let io = |source| ProvisionError::Io { path: self.path.clone(), source };
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).map_err(io)?;
        if !contents.is_empty() && !contents.ends_with('\n') {
            writeln!(file).map_err(io)?;
        }
        for key in &fresh {
            writeln!(file, "{}", key.to_bytes()).map_err(io)?;
        }
        file.flush().map_err(io)?;

        info!(path = %self.path.display(), generated = fresh.len(), total = count, "provisioned keys");
        keys.extend(fresh);
        Ok(keys)
    }
}

/// A funding transfer that landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Funded {
    /// Funding transfer.
    pub tx_hash: B256,
    /// Block the transfer was included in.
    pub block: u64,
}

/// Result of funding one account.
#[derive(Debug)]
pub struct FundOutcome {
    /// Account being funded.
    pub address: Address,
    /// The included transfer, or why the account was not funded.
    pub result: Result<Funded, ProvisionError>,
}

/// Moves value to test accounts.
#[async_trait]
pub trait Funder: Send {
    /// Sends `amount` to each of `accounts` and waits for the transfers to land.
    ///
    /// Returns one outcome per account, in order. A failed account does not
    /// stop the others; the outer error means nothing could be sent.
    async fn fund(
        &mut self,
        accounts: &[Address],
        amount: U256,
    ) -> Result<Vec<FundOutcome>, ProvisionError>;
}

/// Funds accounts with plain transfers from one funding key.
#[derive(Debug)]
pub struct TransferFunder<T> {
    client: RpcClient<T>,
    key: PrivateKeySigner,
    chain_id: u64,
    gas_price: u128,
    max_retries: u32,
    poll_interval: Duration,
    max_polls: u32,
}

impl<T: Transport> TransferFunder<T> {
    /// Funder spending from `key` on `chain_id`.
    pub const fn new(client: RpcClient<T>, key: PrivateKeySigner, chain_id: u64) -> Self {
        Self {
            client,
            key,
            chain_id,
            gas_price: 1_000_000_000,
            max_retries: 3,
            poll_interval: Duration::from_secs(1),
            max_polls: 60,
        }
    }

    /// Sets the gas price of funding transfers.
    pub const fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = gas_price;
        self
    }

    /// Sets how often and how long inclusion is polled.
    pub const fn with_inclusion_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn pending_nonce(&mut self, address: Address) -> Result<u64, CallError> {
        self.client
            .call_with_recovery(&TransactionCount { address, tag: BlockTag::Pending }, self.max_retries)
            .await
    }

    async fn send(&mut self, raw: alloy_primitives::Bytes) -> Result<B256, ProvisionError> {
        let local_hash = keccak256(&raw);
        match self.client.call_with_recovery(&SendRawTransaction(raw), self.max_retries).await {
            Ok(hash) => Ok(hash),
            Err(CallError::Rejected(rejection)) if rejection.is_already_known() => Ok(local_hash),
            Err(error) => Err(error.into()),
        }
    }

    async fn wait_for_inclusion(&mut self, hash: B256) -> Result<u64, ProvisionError> {
        for poll in 0..self.max_polls {
            let tx =
                self.client.call_with_recovery(&TransactionByHash(hash), self.max_retries).await?;
            if let Some(block) = tx.and_then(|tx| tx.inclusion_block()) {
                return Ok(block);
            }
            debug!(%hash, poll, "funding transfer not yet included");
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(ProvisionError::NotIncluded(hash))
    }
}

#[async_trait]
impl<T: Transport> Funder for TransferFunder<T> {
    async fn fund(
        &mut self,
        accounts: &[Address],
        amount: U256,
    ) -> Result<Vec<FundOutcome>, ProvisionError> {
        let from = self.key.address();
        let mut nonce = self.pending_nonce(from).await?;
        info!(%from, nonce, accounts = accounts.len(), %amount, "funding accounts");

        let mut sent = Vec::with_capacity(accounts.len());
        for &address in accounts {
            let request = TransferRequest {
                nonce,
                to: address,
                value: amount,
                gas_limit: 21_000,
                gas_price: self.gas_price,
                chain_id: self.chain_id,
            };
            let hash = match LegacySigner.sign(&request, &self.key) {
                Ok(raw) => self.send(raw).await,
                Err(error) => Err(error.into()),
            };

            match &hash {
                Ok(hash) => {
                    debug!(%address, nonce, %hash, "funding transfer sent");
                    nonce += 1;
                }
                Err(error) => {
                    warn!(%address, nonce, %error, "funding transfer failed");
                    // Only a lost exchange leaves the nonce in doubt.
                    if matches!(error, ProvisionError::Call(e) if !matches!(e, CallError::Rejected(_))) {
                        match self.pending_nonce(from).await {
                            Ok(pending) => nonce = pending,
                            Err(error) => warn!(%from, %error, "failed to refresh funding nonce"),
                        }
                    }
                }
            }
            sent.push((address, hash));
        }

        let mut outcomes = Vec::with_capacity(sent.len());
        for (address, hash) in sent {
            let result = match hash {
                Ok(tx_hash) => {
                    self.wait_for_inclusion(tx_hash).await.map(|block| Funded { tx_hash, block })
                }
                Err(error) => Err(error),
            };
            outcomes.push(FundOutcome { address, result });
        }

        let funded = outcomes.iter().filter(|outcome| outcome.result.is_ok()).count();
        info!(funded, failed = outcomes.len() - funded, "funding finished");
        Ok(outcomes)
    }
}
