//! Matching bank-transfer notifications to orders.
//!
//! The payer types the memo by hand, so it is searched with an ordered list
//! of patterns and the first hit wins:
//!
//! 1. a token carrying the order prefix: `ORD123`, `ord123`, `ORD 123`
//! 2. a label followed by the order number: `DH 123`, `DONHANG ABC9`
//! 3. a bare run of digits long enough to be an order number: `thanh toan 123456`
//!
//! Patterns 2 and 3 add the prefix when the number is all digits.

use crate::config::{MemoPatterns, OverpaymentPolicy};
use crate::reconcile::{ReconcileError, Reconciler};
use crate::settlement::{FailureReason, SettlementOutcome, SettlementResult};
use bridgepay_sdk::objects::BankTransferNotification;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("no order number found in memo")]
    OrderNumberNotFound,

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("invalid notification: {0}")]
    InvalidNotification(&'static str),

    #[error(transparent)]
    Reconcile(ReconcileError),
}

impl From<ReconcileError> for MatchError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::OrderNumberNotFound(number) => MatchError::OrderNotFound(number),
            other => MatchError::Reconcile(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub order_id: Uuid,
    pub order_number: String,
    /// Order total.
    pub expected: Decimal,
    pub received: Decimal,
    /// `received - expected` when positive, else zero.
    pub excess: Decimal,
    /// `received >= expected`.
    pub within_expected_amount: bool,
}

fn tokens(memo: &str) -> Vec<String> {
    memo.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_uppercase())
        .collect()
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Pull an order number out of free text.
pub fn extract_order_number(memo: &str, patterns: &MemoPatterns) -> Option<String> {
    let prefix = patterns.order_prefix.to_ascii_uppercase();
    let tokens = tokens(memo);

    let prefixed = tokens.iter().enumerate().find_map(|(i, token)| {
        let rest = token.strip_prefix(prefix.as_str())?;
        if all_digits(rest) {
            return Some(token.clone());
        }
        match tokens.get(i + 1) {
            Some(next) if rest.is_empty() && all_digits(next) => Some(format!("{prefix}{next}")),
            _ => None,
        }
    });
    if prefixed.is_some() {
        return prefixed;
    }

    let labelled = tokens.windows(2).find_map(|pair| {
        let is_label = patterns
            .labels
            .iter()
            .any(|label| label.eq_ignore_ascii_case(&pair[0]));
        if !is_label {
            return None;
        }
        let number = &pair[1];
        if all_digits(number) {
            Some(format!("{prefix}{number}"))
        } else {
            Some(number.clone())
        }
    });
    if labelled.is_some() {
        return labelled;
    }

    tokens
        .iter()
        .find(|t| all_digits(t) && t.len() >= patterns.min_numeric_digits)
        .map(|digits| format!("{prefix}{digits}"))
}

/// Compare a notified amount against the order total.
pub fn compare_amount(expected: Decimal, received: Decimal) -> (bool, Decimal) {
    let within = received >= expected;
    let excess = if within { received - expected } else { Decimal::ZERO };
    (within, excess)
}

#[derive(Clone)]
pub struct WebhookMatcher {
    reconciler: Reconciler,
    patterns: MemoPatterns,
    overpayment: OverpaymentPolicy,
}

impl WebhookMatcher {
    pub fn new(reconciler: Reconciler, patterns: MemoPatterns, overpayment: OverpaymentPolicy) -> Self {
        Self {
            reconciler,
            patterns,
            overpayment,
        }
    }

    /// Find the order a notification pays for and check the amount.
    pub async fn match_notification(
        &self,
        notification: &BankTransferNotification,
    ) -> Result<MatchResult, MatchError> {
        if notification.provider_tx_id.trim().is_empty() {
            return Err(MatchError::InvalidNotification("provider_tx_id is empty"));
        }
        if notification.amount.is_sign_negative() {
            return Err(MatchError::InvalidNotification("amount is negative"));
        }
        let order_number = extract_order_number(&notification.memo_text, &self.patterns)
            .ok_or(MatchError::OrderNumberNotFound)?;
        let order = self.reconciler.load_by_number(&order_number).await?;

        let (within_expected_amount, excess) = compare_amount(order.total, notification.amount);
        Ok(MatchResult {
            order_id: order.order_id,
            order_number,
            expected: order.total,
            received: notification.amount,
            excess,
            within_expected_amount,
        })
    }

    /// The settlement result a matched notification stands for.
    pub fn settlement_result(
        &self,
        matched: &MatchResult,
        notification: &BankTransferNotification,
    ) -> SettlementResult {
        let failure = |reason, detail: String| SettlementResult {
            outcome: SettlementOutcome::Failure(reason),
            native_amount: Decimal::ZERO,
            transaction_id: notification.provider_tx_id.clone(),
            block_reference: None,
            fee_used: None,
            error_detail: Some(detail),
            counterparty: None,
        };

        if !matched.within_expected_amount {
            warn!(
                order_number = %matched.order_number,
                expected = %matched.expected,
                received = %matched.received,
                "Bank transfer below order total"
            );
            return failure(
                FailureReason::InsufficientAmount,
                format!(
                    "insufficient amount: expected {}, received {}",
                    matched.expected, matched.received
                ),
            );
        }
        if !matched.excess.is_zero() {
            match self.overpayment {
                OverpaymentPolicy::Accept => {
                    info!(
                        order_number = %matched.order_number,
                        excess = %matched.excess,
                        provider_tx_id = %notification.provider_tx_id,
                        "Accepting overpayment"
                    );
                }
                OverpaymentPolicy::Reject => {
                    warn!(
                        order_number = %matched.order_number,
                        excess = %matched.excess,
                        "Rejecting overpayment"
                    );
                    return failure(
                        FailureReason::Overpaid,
                        format!("overpaid by {}", matched.excess),
                    );
                }
            }
        }
        SettlementResult {
            outcome: SettlementOutcome::Success,
            native_amount: Decimal::ZERO,
            transaction_id: notification.provider_tx_id.clone(),
            block_reference: None,
            fee_used: None,
            error_detail: None,
            counterparty: None,
        }
    }
}
