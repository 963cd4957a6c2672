//! Card identity mapper.
//!
//! This is a simulation boundary, not a card-network integration: a card
//! number is hashed into a stable pseudo-identity which picks one account
//! of the fixed [`WalletPool`]. No card verification or tokenisation takes
//! place. Only the number is hashed; expiry and CVV are checked for shape
//! and then dropped, so re-entering the same card with a different CVV
//! still reaches the same account.

use crate::wallet::{LedgerAccountMapping, WalletPool};
use alloy::primitives::U256;
use bridgepay_sdk::objects::{CardPaymentRequest, MaskedCardNumber};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    #[error("invalid card format: {0}")]
    InvalidCardFormat(&'static str),
}

/// Card fields as presented at checkout. Never persisted or logged.
#[derive(Clone, PartialEq, Eq)]
pub struct CardPresentment {
    pub card_number: String,
    pub holder_name: String,
    pub expiry: String,
    pub cvv: String,
}

impl std::fmt::Debug for CardPresentment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardPresentment")
            .field("card_number", &MaskedCardNumber(&self.card_number))
            .finish_non_exhaustive()
    }
}

impl From<CardPaymentRequest> for CardPresentment {
    fn from(request: CardPaymentRequest) -> Self {
        Self {
            card_number: request.card_number,
            holder_name: request.holder_name,
            expiry: request.expiry,
            cvv: request.cvv,
        }
    }
}

/// Strip whitespace and check for 13 to 19 ASCII digits.
pub fn normalize_card_number(raw: &str) -> Result<String, CardError> {
    let number: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if !(13..=19).contains(&number.len()) {
        return Err(CardError::InvalidCardFormat("card number must have 13-19 digits"));
    }
    if !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CardError::InvalidCardFormat("card number must be numeric"));
    }
    Ok(number)
}

fn check_expiry(expiry: &str) -> Result<(), CardError> {
    let malformed = CardError::InvalidCardFormat("expiry must be MM/YY");
    let (month, year) = expiry.trim().split_once('/').ok_or(malformed.clone())?;
    if month.len() != 2 || year.len() != 2 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed);
    }
    match month.parse::<u8>() {
        Ok(1..=12) => Ok(()),
        _ => Err(malformed),
    }
}

fn check_cvv(cvv: &str) -> Result<(), CardError> {
    let cvv = cvv.trim();
    if (3..=4).contains(&cvv.len()) && cvv.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(CardError::InvalidCardFormat("cvv must have 3-4 digits"))
    }
}

/// Maps card numbers onto the wallet pool.
#[derive(Debug, Clone)]
pub struct CardIdentityMapper {
    salt: String,
    pool: WalletPool,
}

impl CardIdentityMapper {
    pub fn new(salt: impl Into<String>, pool: WalletPool) -> Self {
        Self {
            salt: salt.into(),
            pool,
        }
    }

    pub fn pool(&self) -> &WalletPool {
        &self.pool
    }

    /// Resolve a card to its pool account. Pure: no I/O.
    pub fn derive_account(&self, card: &CardPresentment) -> Result<LedgerAccountMapping, CardError> {
        let number = normalize_card_number(&card.card_number)?;
        check_expiry(&card.expiry)?;
        check_cvv(&card.cvv)?;

        let mut input = Vec::with_capacity(number.len() + self.salt.len());
        input.extend_from_slice(number.as_bytes());
        input.extend_from_slice(self.salt.as_bytes());
        let digest = ring::digest::digest(&ring::digest::SHA256, &input);

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(digest.as_ref());
        let remainder = U256::from_be_bytes(bytes) % U256::from(self.pool.len());
        // remainder < pool size, so the low limb holds all of it
        let index = remainder.as_limbs()[0] as usize;

        let entry = self
            .pool
            .get(index)
            .ok_or(CardError::InvalidCardFormat("wallet pool is empty"))?;
        Ok(LedgerAccountMapping {
            identity_hash: alloy::hex::encode(digest.as_ref()),
            index,
            account_address: entry.address,
            starting_balance: entry.starting_balance,
            signer: entry.signer(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{LocalSigner, Signer};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn mapper(size: usize) -> CardIdentityMapper {
        let signers = (0..size)
            .map(|_| (Arc::new(LocalSigner::random()) as Arc<dyn Signer>, Decimal::from(50)))
            .collect();
        CardIdentityMapper::new("test-salt", WalletPool::from_signers(signers).unwrap())
    }

    fn card(number: &str) -> CardPresentment {
        CardPresentment {
            card_number: number.to_string(),
            holder_name: "NGUYEN VAN A".to_string(),
            expiry: "12/27".to_string(),
            cvv: "123".to_string(),
        }
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let mapper = mapper(5);
        let first = mapper.derive_account(&card("4532111111111234")).unwrap();
        let again = mapper.derive_account(&card("4532111111111234")).unwrap();
        assert_eq!(first.index, again.index);
        assert_eq!(first.account_address, again.account_address);
        assert_eq!(first.identity_hash, again.identity_hash);
        assert_eq!(first.identity_hash.len(), 64);
    }

    #[test]
    fn test_whitespace_cvv_and_expiry_do_not_change_identity() {
        let mapper = mapper(7);
        let plain = mapper.derive_account(&card("4532111111111234")).unwrap();
        let mut spaced = card("4532 1111 1111 1234");
        spaced.cvv = "9876".to_string();
        spaced.expiry = "01/30".to_string();
        let spaced = mapper.derive_account(&spaced).unwrap();
        assert_eq!(plain.account_address, spaced.account_address);
        assert_eq!(plain.identity_hash, spaced.identity_hash);
    }

    #[test]
    fn test_salt_changes_identity() {
        let a = mapper(3);
        let b = CardIdentityMapper::new("other-salt", a.pool().clone());
        let card = card("4532111111111234");
        assert_ne!(
            a.derive_account(&card).unwrap().identity_hash,
            b.derive_account(&card).unwrap().identity_hash
        );
    }

    #[test]
    fn test_index_within_pool() {
        let mapper = mapper(3);
        for n in 0..50u64 {
            let number = format!("4{:015}", n * 7919);
            let mapping = mapper.derive_account(&card(&number)).unwrap();
            assert!(mapping.index < 3);
            assert_eq!(
                mapping.account_address,
                mapper.pool().get(mapping.index).unwrap().address
            );
        }
    }

    #[test]
    fn test_random_cards_cover_the_pool() {
        use rand::Rng;

        let mapper = mapper(4);
        let mut rng = rand::rng();
        let mut hits = [0usize; 4];
        for _ in 0..400 {
            let number: String = (0..16)
                .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
                .collect();
            hits[mapper.derive_account(&card(&number)).unwrap().index] += 1;
        }
        assert!(hits.iter().all(|&h| h > 0), "{hits:?}");
    }

    #[test]
    fn test_invalid_numbers() {
        let mapper = mapper(2);
        for bad in ["", "123456789012", "12345678901234567890", "4532-1111-1111-1234", "4532abcd11111234"] {
            assert!(
                matches!(mapper.derive_account(&card(bad)), Err(CardError::InvalidCardFormat(_))),
                "{bad} should be rejected"
            );
        }
        assert!(mapper.derive_account(&card("4532111111111")).is_ok());
        assert!(mapper.derive_account(&card("4532111111111234567")).is_ok());
    }

    #[test]
    fn test_invalid_expiry_and_cvv() {
        let mapper = mapper(2);
        let mut bad_expiry = card("4532111111111234");
        bad_expiry.expiry = "13/27".to_string();
        assert!(mapper.derive_account(&bad_expiry).is_err());
        let mut bad_cvv = card("4532111111111234");
        bad_cvv.cvv = "12".to_string();
        assert!(mapper.derive_account(&bad_cvv).is_err());
    }

    #[test]
    fn test_debug_redacts_number() {
        let shown = format!("{:?}", card("4532111111111234"));
        assert!(shown.contains("****1234"));
        assert!(!shown.contains("4532111111111234"));
        assert!(!shown.contains("NGUYEN"));
    }
}
