//! Signing identities and their nonce counters.

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use derive_more::{Display, From};

use crate::LedgerError;

/// Stable index of an account across the whole run.
#[derive(Debug, Display, From, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("#{_0}")]
pub struct AccountId(pub usize);

/// A signing identity with its next nonce.
#[derive(Debug, Clone)]
pub struct Account {
    id: AccountId,
    signer: PrivateKeySigner,
    next_nonce: u64,
    start_nonce: u64,
}

impl Account {
    /// Creates an account starting at nonce zero, pending a [`AccountLedger::resync`].
    pub const fn new(id: AccountId, signer: PrivateKeySigner) -> Self {
        Self { id, signer, next_nonce: 0, start_nonce: 0 }
    }

    /// Account id.
    pub const fn id(&self) -> AccountId {
        self.id
    }

    /// Address derived from the key.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Key material.
    pub const fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    /// Nonce the next transaction will use.
    pub const fn next_nonce(&self) -> u64 {
        self.next_nonce
    }

    /// Nonces consumed since the last resync.
    pub const fn offset(&self) -> u64 {
        self.next_nonce - self.start_nonce
    }
}

/// The accounts driven by one injector.
///
/// Nonces are handed out strictly increasing per account. A nonce is only
/// consumed once the transaction using it has been built, so a failed build
/// leaves no gap.
#[derive(Debug, Clone, Default)]
pub struct AccountLedger {
    accounts: Vec<Account>,
    cursor: usize,
}

impl AccountLedger {
    /// Creates a ledger over `accounts`.
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self { accounts: accounts.into_iter().collect(), cursor: 0 }
    }

    /// Number of accounts held.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the ledger holds no accounts.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Iterates over the held accounts.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter()
    }

    /// Looks an account up.
    pub fn get(&self, id: AccountId) -> Result<&Account, LedgerError> {
        self.accounts.iter().find(|account| account.id == id).ok_or(LedgerError::UnknownAccount(id))
    }

    fn get_mut(&mut self, id: AccountId) -> Result<&mut Account, LedgerError> {
        self.accounts
            .iter_mut()
            .find(|account| account.id == id)
            .ok_or(LedgerError::UnknownAccount(id))
    }

    /// Next account in round-robin order.
    pub fn next_account(&mut self) -> Option<AccountId> {
        let account = self.accounts.get(self.cursor % self.accounts.len().max(1))?;
        self.cursor = (self.cursor + 1) % self.accounts.len();
        Some(account.id)
    }

    /// Nonce the next reservation for `id` will return.
    pub fn peek(&self, id: AccountId) -> Result<u64, LedgerError> {
        self.get(id).map(Account::next_nonce)
    }

    /// Reserves and returns the next nonce for `id`.
    pub fn next_nonce(&mut self, id: AccountId) -> Result<u64, LedgerError> {
        let account = self.get_mut(id)?;
        let nonce = account.next_nonce;
        account.next_nonce += 1;
        Ok(nonce)
    }

    /// Builds something with the next nonce of `id`, consuming the nonce only
    /// when `build` succeeds.
    pub fn reserve_with<T, E>(
        &mut self,
        id: AccountId,
        build: impl FnOnce(&Account, u64) -> Result<T, E>,
    ) -> Result<(u64, T), E>
    where
        E: From<LedgerError>,
    {
        let account = self.get_mut(id)?;
        let nonce = account.next_nonce;
        let built = build(account, nonce)?;
        account.next_nonce += 1;
        Ok((nonce, built))
    }

    /// Aligns `id` with the nonce reported by the chain. Startup only.
    pub fn resync(&mut self, id: AccountId, chain_nonce: u64) -> Result<(), LedgerError> {
        let account = self.get_mut(id)?;
        account.next_nonce = chain_nonce;
        account.start_nonce = chain_nonce;
        Ok(())
    }

    /// Nonces consumed by `id` since its resync.
    pub fn offset(&self, id: AccountId) -> Result<u64, LedgerError> {
        self.get(id).map(Account::offset)
    }

    /// `(account, offset)` for every account.
    pub fn offsets(&self) -> Vec<(AccountId, u64)> {
        self.accounts.iter().map(|account| (account.id, account.offset())).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::{collection::vec, prelude::*};

    use super::*;

    fn ledger(n: usize) -> AccountLedger {
        AccountLedger::new((0..n).map(|i| Account::new(AccountId(i), PrivateKeySigner::random())))
    }

    #[test]
    fn round_robin() {
        let mut ledger = ledger(3);
        let picked: Vec<_> = (0..7).filter_map(|_| ledger.next_account()).map(|id| id.0).collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(AccountLedger::default().next_account(), None);
    }

    #[test]
    fn resync_resets_offset() {
        let mut ledger = ledger(1);
        let id = AccountId(0);
        ledger.resync(id, 41).unwrap();
        assert_eq!(ledger.next_nonce(id).unwrap(), 41);
        assert_eq!(ledger.next_nonce(id).unwrap(), 42);
        assert_eq!(ledger.peek(id).unwrap(), 43);
        assert_eq!(ledger.offset(id).unwrap(), 2);
    }

    #[test]
    fn failed_build_keeps_nonce() {
        let mut ledger = ledger(1);
        let id = AccountId(0);
        ledger.resync(id, 5).unwrap();

        let failed: Result<(u64, ()), LedgerError> =
            ledger.reserve_with(id, |_, _| Err(LedgerError::UnknownAccount(AccountId(9))));
        assert!(failed.is_err());
        assert_eq!(ledger.peek(id).unwrap(), 5);

        let (nonce, address) =
            ledger.reserve_with::<_, LedgerError>(id, |account, _| Ok(account.address())).unwrap();
        assert_eq!(nonce, 5);
        assert_eq!(address, ledger.get(id).unwrap().address());
        assert_eq!(ledger.peek(id).unwrap(), 6);
    }

    #[test]
    fn unknown_account() {
        let mut ledger = ledger(1);
        assert_eq!(ledger.next_nonce(AccountId(3)), Err(LedgerError::UnknownAccount(AccountId(3))));
    }

    proptest! {
        #[test]
        fn nonces_are_gap_free(
            accounts in 1usize..5,
            starts in vec(0u64..1_000_000, 5),
            outcomes in vec(any::<bool>(), 0..400),
        ) {
            let mut ledger = ledger(accounts);
            for i in 0..accounts {
                ledger.resync(AccountId(i), starts[i]).unwrap();
            }

            let mut used: BTreeMap<AccountId, Vec<u64>> = BTreeMap::new();
            for succeed in outcomes {
                let id = ledger.next_account().unwrap();
                let result = ledger.reserve_with::<_, LedgerError>(id, |_, nonce| {
                    if succeed { Ok(nonce) } else { Err(LedgerError::UnknownAccount(id)) }
                });
                if let Ok((nonce, _)) = result {
                    used.entry(id).or_default().push(nonce);
                }
            }

            for (id, nonces) in used {
                let start = starts[id.0];
                let expected: Vec<u64> = (start..start + nonces.len() as u64).collect();
                prop_assert_eq!(&nonces, &expected);
                prop_assert_eq!(ledger.offset(id).unwrap(), nonces.len() as u64);
            }
        }
    }
}
