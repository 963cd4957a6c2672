//! Settlement of a single payment or refund.
//!
//! A [`SettlementRequest`] is consumed by [`SettlementEngine::build`], and
//! the resulting typestate can only be submitted once, so one request never
//! produces more than one ledger transfer.

pub mod engine;
pub mod locks;

pub use engine::{BuiltSettlement, SettlementEngine, SubmittedSettlement};
pub use locks::{OrderGuard, OrderLocks};

use crate::rate::{ExchangeRate, RateError};
use crate::wallet::{LedgerAccountMapping, Signer};
use alloy::primitives::Address;
use bridgepay_sdk::objects::{SettlementResponse, SettlementStatus};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// `error_detail` of a settlement whose confirmation wait ran out.
pub const PENDING_UNKNOWN: &str = "pending/unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Payment,
    Refund,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Payment => write!(f, "payment"),
            Direction::Refund => write!(f, "refund"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementState {
    Built,
    Submitted,
    Confirmed,
    Rejected,
    TimedOut,
}

impl std::fmt::Display for SettlementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementState::Built => write!(f, "built"),
            SettlementState::Submitted => write!(f, "submitted"),
            SettlementState::Confirmed => write!(f, "confirmed"),
            SettlementState::Rejected => write!(f, "rejected"),
            SettlementState::TimedOut => write!(f, "timed_out"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("invalid settlement request: {0}")]
    InvalidRequest(&'static str),

    #[error(transparent)]
    InvalidRate(#[from] RateError),
}

/// One payment or refund attempt. Deliberately not `Clone`.
#[derive(Debug)]
pub struct SettlementRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub fiat_amount: Decimal,
    pub direction: Direction,
    /// Payer account for payments, refund recipient for refunds.
    pub counterparty_account: Option<Address>,
    /// Rate snapshot taken when the request was created.
    pub rate: ExchangeRate,
    payer: Option<Arc<dyn Signer>>,
}

impl SettlementRequest {
    /// A payment from the card's pool account to the platform account.
    pub fn payment(
        order_id: Uuid,
        order_number: impl Into<String>,
        fiat_amount: Decimal,
        rate: ExchangeRate,
        payer: &LedgerAccountMapping,
    ) -> Self {
        Self {
            order_id,
            order_number: order_number.into(),
            fiat_amount,
            direction: Direction::Payment,
            counterparty_account: Some(payer.account_address),
            rate,
            payer: Some(payer.signer.clone()),
        }
    }

    /// A refund from the platform account back to `counterparty`.
    pub fn refund(
        order_id: Uuid,
        order_number: impl Into<String>,
        fiat_amount: Decimal,
        rate: ExchangeRate,
        counterparty: Option<Address>,
    ) -> Self {
        Self {
            order_id,
            order_number: order_number.into(),
            fiat_amount,
            direction: Direction::Refund,
            counterparty_account: counterparty,
            rate,
            payer: None,
        }
    }
}

/// Why a settlement did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Reverted or refused by the ledger.
    Rejected,
    /// Submitted but unconfirmed within the bound. Outcome unknown.
    TimedOut,
    /// Never reached the ledger.
    NotSubmitted,
    /// A notified transfer was below the order total.
    InsufficientAmount,
    /// A notified transfer exceeded the order total and overpayment is refused.
    Overpaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Success,
    Failure(FailureReason),
}

/// The single output of a settlement, and the only input to reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementResult {
    pub outcome: SettlementOutcome,
    pub native_amount: Decimal,
    /// Ledger transaction hash, or the provider reference for bank transfers.
    /// Empty when nothing was submitted.
    pub transaction_id: String,
    pub block_reference: Option<u64>,
    pub fee_used: Option<Decimal>,
    pub error_detail: Option<String>,
    /// Address of the paying account, recorded as the refund destination.
    pub counterparty: Option<String>,
}

impl SettlementResult {
    pub fn is_success(&self) -> bool {
        self.outcome == SettlementOutcome::Success
    }

    pub fn is_timed_out(&self) -> bool {
        self.outcome == SettlementOutcome::Failure(FailureReason::TimedOut)
    }

    pub fn state(&self) -> SettlementState {
        match self.outcome {
            SettlementOutcome::Success => SettlementState::Confirmed,
            SettlementOutcome::Failure(FailureReason::TimedOut) => SettlementState::TimedOut,
            SettlementOutcome::Failure(_) => SettlementState::Rejected,
        }
    }

    pub(crate) fn failure(
        reason: FailureReason,
        native_amount: Decimal,
        transaction_id: String,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            outcome: SettlementOutcome::Failure(reason),
            native_amount,
            transaction_id,
            block_reference: None,
            fee_used: None,
            error_detail: Some(detail.into()),
            counterparty: None,
        }
    }
}

fn user_message(result: &SettlementResult) -> String {
    let detail = result.error_detail.as_deref().unwrap_or_default();
    match result.outcome {
        SettlementOutcome::Success => "Payment settled.".to_string(),
        SettlementOutcome::Failure(FailureReason::Rejected) if detail.contains("insufficient") => {
            "Insufficient balance on the paying account.".to_string()
        }
        SettlementOutcome::Failure(FailureReason::Rejected) => {
            "The transfer was rejected by the network.".to_string()
        }
        SettlementOutcome::Failure(FailureReason::TimedOut) => {
            "Payment is processing. Do not pay again; check the order status later.".to_string()
        }
        SettlementOutcome::Failure(FailureReason::NotSubmitted) => {
            "Network issue, nothing was charged. Please try again.".to_string()
        }
        SettlementOutcome::Failure(FailureReason::InsufficientAmount) => {
            "Transferred amount is below the order total.".to_string()
        }
        SettlementOutcome::Failure(FailureReason::Overpaid) => {
            "Transferred amount exceeds the order total.".to_string()
        }
    }
}

impl From<SettlementResult> for SettlementResponse {
    fn from(result: SettlementResult) -> Self {
        let status = match result.outcome {
            SettlementOutcome::Success => SettlementStatus::Confirmed,
            SettlementOutcome::Failure(FailureReason::Rejected) => SettlementStatus::Rejected,
            SettlementOutcome::Failure(FailureReason::TimedOut) => SettlementStatus::Processing,
            SettlementOutcome::Failure(FailureReason::NotSubmitted) => {
                SettlementStatus::NotSubmitted
            }
            SettlementOutcome::Failure(FailureReason::InsufficientAmount) => {
                SettlementStatus::InsufficientAmount
            }
            SettlementOutcome::Failure(FailureReason::Overpaid) => SettlementStatus::Overpaid,
        };
        let message = user_message(&result);
        SettlementResponse {
            success: result.is_success(),
            status,
            native_amount: result.native_amount,
            transaction_id: result.transaction_id,
            block_reference: result.block_reference,
            fee_used: result.fee_used,
            error_detail: result.error_detail,
            message,
        }
    }
}
