//! Signing capability for ledger accounts.
//!
//! Business logic only ever sees an `Arc<dyn Signer>`; the private key stays
//! inside [`LocalSigner`] and is never handed out.

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, B256, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("key for {expected} does not match configured address {configured}")]
    AddressMismatch { expected: Address, configured: Address },

    #[error("transfer is from {from}, signer holds {signer}")]
    WrongSender { from: Address, signer: Address },

    #[error("signing failed: {0}")]
    Signing(#[from] alloy::signers::Error),
}

/// A plain value transfer waiting for a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsignedTransfer {
    pub chain_id: u64,
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: u128,
    pub gas_limit: u64,
    pub from: Address,
    pub to: Address,
    /// Value in wei.
    pub value: u128,
}

impl UnsignedTransfer {
    fn to_legacy(self) -> TxLegacy {
        TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: TxKind::Call(self.to),
            value: U256::from(self.value),
            input: Default::default(),
        }
    }
}

/// A signed transfer ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransfer {
    pub tx_id: B256,
    /// EIP-2718 encoded transaction.
    pub raw: Vec<u8>,
}

/// Something that can sign transfers for exactly one account.
pub trait Signer: Send + Sync + std::fmt::Debug {
    fn address(&self) -> Address;

    fn sign(&self, transfer: &UnsignedTransfer) -> Result<SignedTransfer, SignerError>;
}

/// Signer backed by an in-process secp256k1 key.
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    /// Parse a hex private key.
    pub fn from_hex(key: &str) -> Result<Self, SignerError> {
        let inner = key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Parse a hex private key and check it controls `address`.
    pub fn from_hex_for(key: &str, address: Address) -> Result<Self, SignerError> {
        let signer = Self::from_hex(key)?;
        if signer.inner.address() != address {
            return Err(SignerError::AddressMismatch {
                expected: signer.inner.address(),
                configured: address,
            });
        }
        Ok(signer)
    }

    /// A throwaway key, for tests and the simulated ledger.
    pub fn random() -> Self {
        Self {
            inner: PrivateKeySigner::random(),
        }
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.inner.address())
            .finish_non_exhaustive()
    }
}

impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn sign(&self, transfer: &UnsignedTransfer) -> Result<SignedTransfer, SignerError> {
        if transfer.from != self.inner.address() {
            return Err(SignerError::WrongSender {
                from: transfer.from,
                signer: self.inner.address(),
            });
        }
        let mut tx = transfer.to_legacy();
        let signature = self.inner.sign_transaction_sync(&mut tx)?;
        let signed = tx.into_signed(signature);
        let tx_id = *signed.hash();
        let envelope = TxEnvelope::from(signed);
        Ok(SignedTransfer {
            tx_id,
            raw: envelope.encoded_2718(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known development key (anvil account #0).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn transfer(from: Address) -> UnsignedTransfer {
        UnsignedTransfer {
            chain_id: 1337,
            nonce: 0,
            gas_price: 1_000_000_000,
            gas_limit: 21_000,
            from,
            to: Address::repeat_byte(0x11),
            value: 10,
        }
    }

    #[test]
    fn test_parse_dev_key() {
        let address: Address = DEV_ADDRESS.parse().unwrap();
        let signer = LocalSigner::from_hex_for(DEV_KEY, address).unwrap();
        assert_eq!(signer.address(), address);
        assert!(matches!(
            LocalSigner::from_hex_for(DEV_KEY, Address::ZERO),
            Err(SignerError::AddressMismatch { .. })
        ));
        assert!(matches!(
            LocalSigner::from_hex("not-a-key"),
            Err(SignerError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let signer = LocalSigner::from_hex(DEV_KEY).unwrap();
        let shown = format!("{signer:?}");
        assert!(!shown.contains("ac0974bec39a17e3"));
        assert!(shown.contains("address"));
    }

    #[test]
    fn test_sign_is_deterministic_per_nonce() {
        let signer = LocalSigner::random();
        let a = signer.sign(&transfer(signer.address())).unwrap();
        let b = signer.sign(&transfer(signer.address())).unwrap();
        assert_eq!(a, b);
        assert!(!a.raw.is_empty());

        let mut next = transfer(signer.address());
        next.nonce = 1;
        assert_ne!(signer.sign(&next).unwrap().tx_id, a.tx_id);
    }

    #[test]
    fn test_refuses_foreign_sender() {
        let signer = LocalSigner::random();
        assert!(matches!(
            signer.sign(&transfer(Address::repeat_byte(0x22))),
            Err(SignerError::WrongSender { .. })
        ));
    }
}
