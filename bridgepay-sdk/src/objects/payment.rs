//! Card payment request and settlement response types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Card details submitted by the checkout screen.
///
/// The fields are only forwarded to the card identity mapper and are never
/// echoed back. `Debug` shows the last four digits of the number only.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPaymentRequest {
    pub card_number: String,
    pub holder_name: String,
    /// Expiry in `MM/YY` form.
    pub expiry: String,
    pub cvv: String,
}

/// A card number that formats as its last four digits only.
pub struct MaskedCardNumber<'a>(pub &'a str);

impl std::fmt::Debug for MaskedCardNumber<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let digits: Vec<char> = self.0.chars().filter(|c| c.is_ascii_digit()).collect();
        let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
        write!(f, "****{tail}")
    }
}

impl std::fmt::Debug for CardPaymentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardPaymentRequest")
            .field("card_number", &MaskedCardNumber(&self.card_number))
            .finish_non_exhaustive()
    }
}

/// Coarse settlement status for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// The transfer was included on the ledger.
    Confirmed,
    /// The ledger refused or reverted the transfer.
    Rejected,
    /// The transfer was sent but not confirmed in time. Do not pay again.
    Processing,
    /// Nothing was sent to the ledger.
    NotSubmitted,
    /// A bank-transfer notification did not carry enough money.
    InsufficientAmount,
    /// A bank-transfer notification carried more money than the policy allows.
    Overpaid,
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementStatus::Confirmed => write!(f, "confirmed"),
            SettlementStatus::Rejected => write!(f, "rejected"),
            SettlementStatus::Processing => write!(f, "processing"),
            SettlementStatus::NotSubmitted => write!(f, "not_submitted"),
            SettlementStatus::InsufficientAmount => write!(f, "insufficient_amount"),
            SettlementStatus::Overpaid => write!(f, "overpaid"),
        }
    }
}

/// Result of a payment or refund attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResponse {
    pub success: bool,
    pub status: SettlementStatus,
    /// Amount in the ledger's native unit.
    pub native_amount: Decimal,
    /// Ledger transaction hash. Empty when nothing was submitted or the
    /// ledger never answered the submission.
    pub transaction_id: String,
    pub block_reference: Option<u64>,
    pub fee_used: Option<Decimal>,
    pub error_detail: Option<String>,
    /// Message suitable for showing to the user.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_masks_card_number() {
        let request = CardPaymentRequest {
            card_number: "4532 1111 1111 1234".to_string(),
            holder_name: "NGUYEN VAN A".to_string(),
            expiry: "12/27".to_string(),
            cvv: "123".to_string(),
        };
        let shown = format!("{request:?}");
        assert!(shown.contains("****1234"));
        assert!(!shown.contains("4532"));
        assert_eq!(format!("{:?}", MaskedCardNumber("12")), "****12");
    }
}
