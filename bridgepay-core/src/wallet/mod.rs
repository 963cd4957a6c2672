//! The fixed pool of pre-provisioned ledger accounts.
//!
//! The pool is built once at start-up and never changes while the process
//! runs, so an index into it is a stable account identity.

pub mod signer;

pub use signer::{LocalSigner, SignedTransfer, Signer, SignerError, UnsignedTransfer};

use alloy::primitives::Address;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletPoolError {
    #[error("wallet pool must not be empty")]
    Empty,

    #[error("wallet_pool_size {size} exceeds the {available} configured wallets")]
    TooSmall { size: usize, available: usize },

    #[error("wallet {0} appears more than once in the pool")]
    DuplicateAddress(Address),

    #[error("wallet {address} has a negative starting balance")]
    NegativeBalance { address: Address },

    #[error("wallet #{index}: {source}")]
    Signer {
        index: usize,
        #[source]
        source: SignerError,
    },
}

/// One configured pool account, before validation.
#[derive(Debug, Clone)]
pub struct PoolAccountConfig {
    pub address: Address,
    /// Hex private key.
    pub signing_key: String,
    /// Starting balance in native units.
    pub starting_balance: Decimal,
}

/// A validated pool slot.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub index: usize,
    pub address: Address,
    pub starting_balance: Decimal,
    signer: Arc<dyn Signer>,
}

impl PoolEntry {
    pub fn signer(&self) -> Arc<dyn Signer> {
        Arc::clone(&self.signer)
    }
}

/// The account a card identity resolved to.
#[derive(Debug, Clone)]
pub struct LedgerAccountMapping {
    /// Hex SHA-256 of the salted card number.
    pub identity_hash: String,
    pub index: usize,
    pub account_address: Address,
    pub starting_balance: Decimal,
    pub signer: Arc<dyn Signer>,
}

/// Read-only, shareable wallet pool.
#[derive(Debug, Clone)]
pub struct WalletPool {
    entries: Arc<[PoolEntry]>,
}

impl WalletPool {
    /// Build a pool from the first `size` configured accounts.
    pub fn from_config(accounts: &[PoolAccountConfig], size: usize) -> Result<Self, WalletPoolError> {
        if size == 0 || accounts.is_empty() {
            return Err(WalletPoolError::Empty);
        }
        if size > accounts.len() {
            return Err(WalletPoolError::TooSmall {
                size,
                available: accounts.len(),
            });
        }
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(size);
        for (index, account) in accounts.iter().take(size).enumerate() {
            if !seen.insert(account.address) {
                return Err(WalletPoolError::DuplicateAddress(account.address));
            }
            if account.starting_balance.is_sign_negative() && !account.starting_balance.is_zero() {
                return Err(WalletPoolError::NegativeBalance {
                    address: account.address,
                });
            }
            let signer = LocalSigner::from_hex_for(&account.signing_key, account.address)
                .map_err(|source| WalletPoolError::Signer { index, source })?;
            entries.push(PoolEntry {
                index,
                address: account.address,
                starting_balance: account.starting_balance,
                signer: Arc::new(signer),
            });
        }
        Ok(Self {
            entries: entries.into(),
        })
    }

    /// Build a pool from ready signers.
    pub fn from_signers(
        signers: Vec<(Arc<dyn Signer>, Decimal)>,
    ) -> Result<Self, WalletPoolError> {
        if signers.is_empty() {
            return Err(WalletPoolError::Empty);
        }
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(signers.len());
        for (index, (signer, starting_balance)) in signers.into_iter().enumerate() {
            let address = signer.address();
            if !seen.insert(address) {
                return Err(WalletPoolError::DuplicateAddress(address));
            }
            entries.push(PoolEntry {
                index,
                address,
                starting_balance,
                signer,
            });
        }
        Ok(Self {
            entries: entries.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PoolEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_accounts(n: usize) -> Vec<PoolAccountConfig> {
        (0..n)
            .map(|_| {
                let key = alloy::signers::local::PrivateKeySigner::random();
                PoolAccountConfig {
                    address: key.address(),
                    signing_key: alloy::hex::encode(key.to_bytes()),
                    starting_balance: Decimal::from(100),
                }
            })
            .collect()
    }

    #[test]
    fn test_pool_truncates_to_size() {
        let accounts = random_accounts(4);
        let pool = WalletPool::from_config(&accounts, 3).unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get(2).unwrap().address, accounts[2].address);
        assert_eq!(pool.get(1).unwrap().signer().address(), accounts[1].address);
        assert!(pool.get(3).is_none());
    }

    #[test]
    fn test_pool_validation() {
        let accounts = random_accounts(2);
        assert!(matches!(
            WalletPool::from_config(&accounts, 0),
            Err(WalletPoolError::Empty)
        ));
        assert!(matches!(
            WalletPool::from_config(&accounts, 3),
            Err(WalletPoolError::TooSmall { size: 3, available: 2 })
        ));

        let mut dup = accounts.clone();
        dup[1] = dup[0].clone();
        assert!(matches!(
            WalletPool::from_config(&dup, 2),
            Err(WalletPoolError::DuplicateAddress(_))
        ));

        let mut wrong_key = accounts.clone();
        wrong_key[1].signing_key = accounts[0].signing_key.clone();
        assert!(matches!(
            WalletPool::from_config(&wrong_key, 2),
            Err(WalletPoolError::Signer { index: 1, .. })
        ));
    }
}
