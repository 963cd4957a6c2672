//! The settlement state machine: `Built -> Submitted -> Confirmed | Rejected | TimedOut`.
//!
//! Each state is its own type. `submit` and `confirm` take `self`, so the
//! compiler guarantees a built settlement is submitted at most once and
//! that confirmation always follows submission.

use super::{
    Direction, FailureReason, PENDING_UNKNOWN, SettlementError, SettlementOutcome,
    SettlementRequest, SettlementResult, SettlementState,
};
use crate::config::MAX_CONFIRMATION_TIMEOUT;
use crate::ledger::{ConfirmationOutcome, LedgerClient, PendingHandle, SubmitError};
use crate::wallet::Signer;
use alloy::primitives::Address;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct SettlementEngine {
    ledger: Arc<dyn LedgerClient>,
    /// Receives payments and funds refunds.
    platform: Arc<dyn Signer>,
    confirmation_timeout: Duration,
}

impl SettlementEngine {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        platform: Arc<dyn Signer>,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            platform,
            confirmation_timeout: confirmation_timeout.min(MAX_CONFIRMATION_TIMEOUT),
        }
    }

    pub fn platform_address(&self) -> Address {
        self.platform.address()
    }

    pub fn ledger(&self) -> Arc<dyn LedgerClient> {
        Arc::clone(&self.ledger)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        self.confirmation_timeout
    }

    /// Validate the request and fix the native amount. No side effects.
    pub fn build(&self, request: SettlementRequest) -> Result<BuiltSettlement, SettlementError> {
        if request.fiat_amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidRequest("fiat amount must be positive"));
        }
        if request.order_number.trim().is_empty() {
            return Err(SettlementError::InvalidRequest("order number must not be empty"));
        }
        let native_amount = request.rate.to_native(request.fiat_amount)?;
        if native_amount.is_zero() {
            return Err(SettlementError::InvalidRequest(
                "amount is smaller than one native base unit",
            ));
        }

        let (signer, to) = match request.direction {
            Direction::Payment => {
                let payer = request
                    .payer
                    .ok_or(SettlementError::InvalidRequest("payment has no paying account"))?;
                (payer, self.platform.address())
            }
            Direction::Refund => {
                let to = request
                    .counterparty_account
                    .ok_or(SettlementError::InvalidRequest("refund has no counterparty"))?;
                (Arc::clone(&self.platform), to)
            }
        };

        info!(
            order_id = %request.order_id,
            order_number = %request.order_number,
            direction = %request.direction,
            fiat_amount = %request.fiat_amount,
            rate = %request.rate,
            %native_amount,
            state = %SettlementState::Built,
            "Settlement built"
        );
        Ok(BuiltSettlement {
            ledger: Arc::clone(&self.ledger),
            timeout: self.confirmation_timeout,
            order_id: request.order_id,
            direction: request.direction,
            counterparty: request.counterparty_account,
            signer,
            to,
            native_amount,
        })
    }

    /// Build, submit and wait, in one call.
    pub async fn execute(
        &self,
        request: SettlementRequest,
    ) -> Result<SettlementResult, SettlementError> {
        let built = self.build(request)?;
        Ok(match built.submit().await {
            Ok(submitted) => submitted.confirm().await,
            Err(result) => result,
        })
    }
}

/// A validated settlement that has not touched the ledger.
pub struct BuiltSettlement {
    ledger: Arc<dyn LedgerClient>,
    timeout: Duration,
    order_id: Uuid,
    direction: Direction,
    counterparty: Option<Address>,
    signer: Arc<dyn Signer>,
    to: Address,
    native_amount: Decimal,
}

impl BuiltSettlement {
    pub fn native_amount(&self) -> Decimal {
        self.native_amount
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    /// Send the transfer.
    ///
    /// On `Err` nothing is pending on the ledger and the returned result is
    /// final, except when the ledger never answered. That case comes back
    /// timed out with an empty transaction id: the transfer may exist but
    /// cannot be tracked.
    pub async fn submit(self) -> Result<SubmittedSettlement, SettlementResult> {
        let limit = self.ledger.submit_timeout();
        let submitted = tokio::time::timeout(
            limit,
            self.ledger
                .submit_transfer(self.signer.as_ref(), self.to, self.native_amount),
        )
        .await;
        let Ok(submitted) = submitted else {
            error!(
                order_id = %self.order_id,
                timeout = ?limit,
                state = %SettlementState::TimedOut,
                "Ledger never answered the submission, transfer state unknown"
            );
            return Err(SettlementResult::failure(
                FailureReason::TimedOut,
                self.native_amount,
                String::new(),
                PENDING_UNKNOWN,
            ));
        };
        let handle = match submitted {
            Ok(handle) => handle,
            Err(SubmitError::InDoubt { handle, detail }) => {
                warn!(
                    order_id = %self.order_id,
                    tx_id = %handle.tx_id,
                    %detail,
                    "Submission answer lost, waiting for the transfer anyway"
                );
                handle
            }
            Err(SubmitError::Rejected(detail)) => {
                warn!(order_id = %self.order_id, %detail, state = %SettlementState::Rejected, "Transfer refused at submission");
                return Err(SettlementResult::failure(
                    FailureReason::Rejected,
                    self.native_amount,
                    String::new(),
                    detail,
                ));
            }
            Err(SubmitError::NotSubmitted(e)) => {
                warn!(order_id = %self.order_id, error = %e, "Transfer not submitted");
                return Err(SettlementResult::failure(
                    FailureReason::NotSubmitted,
                    self.native_amount,
                    String::new(),
                    e.to_string(),
                ));
            }
        };

        info!(
            order_id = %self.order_id,
            tx_id = %handle.tx_id,
            from = %handle.from,
            to = %handle.to,
            state = %SettlementState::Submitted,
            "Transfer submitted"
        );
        Ok(SubmittedSettlement {
            ledger: self.ledger,
            timeout: self.timeout,
            order_id: self.order_id,
            direction: self.direction,
            counterparty: self.counterparty,
            native_amount: self.native_amount,
            handle,
        })
    }
}

/// A transfer on its way. Must be driven to an outcome.
pub struct SubmittedSettlement {
    ledger: Arc<dyn LedgerClient>,
    timeout: Duration,
    order_id: Uuid,
    direction: Direction,
    counterparty: Option<Address>,
    native_amount: Decimal,
    handle: PendingHandle,
}

impl SubmittedSettlement {
    pub fn handle(&self) -> &PendingHandle {
        &self.handle
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Wait for inclusion, bounded by the configured timeout.
    pub async fn confirm(self) -> SettlementResult {
        let tx_id = self.handle.tx_id.to_string();
        let result = match self.ledger.await_confirmation(&self.handle, self.timeout).await {
            ConfirmationOutcome::Confirmed(confirmation) => SettlementResult {
                outcome: SettlementOutcome::Success,
                native_amount: self.native_amount,
                transaction_id: tx_id,
                block_reference: Some(confirmation.block_number),
                fee_used: Some(confirmation.fee_used),
                error_detail: None,
                counterparty: self.counterparty.map(|a| a.to_string()),
            },
            ConfirmationOutcome::Rejected { detail } => SettlementResult::failure(
                FailureReason::Rejected,
                self.native_amount,
                tx_id,
                detail,
            ),
            ConfirmationOutcome::TimedOut => SettlementResult::failure(
                FailureReason::TimedOut,
                self.native_amount,
                tx_id,
                PENDING_UNKNOWN,
            ),
        };
        info!(
            order_id = %self.order_id,
            tx_id = %result.transaction_id,
            direction = %self.direction,
            state = %result.state(),
            block = ?result.block_reference,
            "Settlement resolved"
        );
        result
    }
}
