//! Bank-transfer notification payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::signature::Signature;

/// Transfer notification pushed by the payment provider.
///
/// The memo is free text typed by the payer, e.g. `"DH ORD123 thanh toan"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransferNotification {
    /// Amount received, in fiat.
    pub amount: Decimal,
    pub memo_text: String,
    /// Provider-side transaction identifier, stable across redeliveries.
    pub provider_tx_id: String,
}

impl Signature for BankTransferNotification {}

/// Acknowledgement returned to the notification sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAck {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl NotificationAck {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}
