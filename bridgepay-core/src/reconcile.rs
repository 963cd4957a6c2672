//! Reconciliation of settlement results into order state.
//!
//! This is the only code that writes payment fields. Every write goes
//! through [`plan_transition`], which encodes the legal transitions:
//!
//! | direction | outcome  | from              | to                      |
//! |-----------|----------|-------------------|-------------------------|
//! | payment   | success  | pending, failed   | paid + confirmed        |
//! | payment   | failure  | pending           | failed                  |
//! | payment   | overpaid | any               | no write                |
//! | refund    | success  | paid              | refunded + cancelled    |
//! | any       | timeout  | any               | no write                |
//!
//! Replaying a result that is already recorded is a no-op.

use crate::entities::order_records::{OrderPatch, OrderRecord};
use crate::entities::{OrderStatus, PaymentStatus};
use crate::settlement::{Direction, FailureReason, SettlementOutcome, SettlementResult};
use crate::store::{self, OrderStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("order number not found: {0}")]
    OrderNumberNotFound(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("{direction} result cannot apply to order {order_id} in state {payment_status}/{order_status}")]
    IllegalTransition {
        order_id: Uuid,
        direction: Direction,
        payment_status: PaymentStatus,
        order_status: OrderStatus,
    },

    #[error("order {order_id} already settled by {existing}, refusing {incoming}")]
    Conflict {
        order_id: Uuid,
        existing: String,
        incoming: String,
    },

    #[error("successful settlement carries no transaction id")]
    MissingTransactionId,
}

/// What reconciling a result does to the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Write these fields.
    Write(OrderPatch),
    /// The result is already recorded.
    AlreadyApplied,
    /// Outcome unknown (timeout). Nothing is written.
    Deferred,
    /// A failure that must not downgrade the order. Nothing is written.
    Retained,
}

/// Decide how `result` changes `order`. Pure.
pub fn plan_transition(
    order: &OrderRecord,
    direction: Direction,
    result: &SettlementResult,
    now: OffsetDateTime,
) -> Result<Transition, ReconcileError> {
    if result.is_timed_out() {
        return Ok(Transition::Deferred);
    }
    let illegal = || ReconcileError::IllegalTransition {
        order_id: order.order_id,
        direction,
        payment_status: order.payment_status,
        order_status: order.order_status,
    };
    let tx = result.transaction_id.as_str();

    match (direction, result.outcome) {
        (Direction::Payment, SettlementOutcome::Success) => {
            if tx.is_empty() {
                return Err(ReconcileError::MissingTransactionId);
            }
            match order.payment_status {
                PaymentStatus::Paid | PaymentStatus::Refunded
                    if order.transaction_id.as_deref() == Some(tx) =>
                {
                    Ok(Transition::AlreadyApplied)
                }
                PaymentStatus::Paid => Err(ReconcileError::Conflict {
                    order_id: order.order_id,
                    existing: order.transaction_id.clone().unwrap_or_default(),
                    incoming: tx.to_string(),
                }),
                PaymentStatus::Pending | PaymentStatus::Failed
                    if order.order_status != OrderStatus::Cancelled =>
                {
                    Ok(Transition::Write(OrderPatch {
                        payment_status: Some(PaymentStatus::Paid),
                        order_status: Some(OrderStatus::Confirmed),
                        transaction_id: Some(tx.to_string()),
                        payer_address: result.counterparty.clone(),
                        paid_at: Some(now),
                        ..Default::default()
                    }))
                }
                _ => Err(illegal()),
            }
        }
        // a refused overpayment leaves the order for the payer to sort out
        (Direction::Payment, SettlementOutcome::Failure(FailureReason::Overpaid)) => {
            Ok(Transition::Retained)
        }
        (Direction::Payment, SettlementOutcome::Failure(_)) => match order.payment_status {
            PaymentStatus::Pending => Ok(Transition::Write(OrderPatch {
                payment_status: Some(PaymentStatus::Failed),
                ..Default::default()
            })),
            PaymentStatus::Failed => Ok(Transition::AlreadyApplied),
            _ => Ok(Transition::Retained),
        },
        (Direction::Refund, SettlementOutcome::Success) => {
            if tx.is_empty() {
                return Err(ReconcileError::MissingTransactionId);
            }
            match order.payment_status {
                PaymentStatus::Paid => Ok(Transition::Write(OrderPatch {
                    payment_status: Some(PaymentStatus::Refunded),
                    order_status: Some(OrderStatus::Cancelled),
                    refund_tx_hash: Some(tx.to_string()),
                    refunded_at: Some(now),
                    ..Default::default()
                })),
                PaymentStatus::Refunded if order.refund_tx_hash.as_deref() == Some(tx) => {
                    Ok(Transition::AlreadyApplied)
                }
                PaymentStatus::Refunded => Err(ReconcileError::Conflict {
                    order_id: order.order_id,
                    existing: order.refund_tx_hash.clone().unwrap_or_default(),
                    incoming: tx.to_string(),
                }),
                _ => Err(illegal()),
            }
        }
        // a failed refund leaves the order paid
        (Direction::Refund, SettlementOutcome::Failure(_)) => Ok(Transition::Retained),
    }
}

/// Applies settlement results to the order store.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn OrderStore>,
    store_timeout: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn OrderStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    pub async fn load(&self, order_id: Uuid) -> Result<OrderRecord, ReconcileError> {
        store::with_timeout(self.store_timeout, self.store.get_order(order_id))
            .await?
            .ok_or(ReconcileError::OrderNotFound(order_id))
    }

    pub async fn load_by_number(&self, order_number: &str) -> Result<OrderRecord, ReconcileError> {
        store::with_timeout(
            self.store_timeout,
            self.store.find_order_by_number(order_number),
        )
        .await?
        .ok_or_else(|| ReconcileError::OrderNumberNotFound(order_number.to_string()))
    }

    /// Record `result` on the order. Safe to call repeatedly with the same result.
    pub async fn apply_result(
        &self,
        order_id: Uuid,
        direction: Direction,
        result: &SettlementResult,
    ) -> Result<Transition, ReconcileError> {
        let order = self.load(order_id).await?;
        let transition = match plan_transition(&order, direction, result, OffsetDateTime::now_utc()) {
            Ok(transition) => transition,
            Err(e @ ReconcileError::Conflict { .. }) => {
                error!(%order_id, %direction, error = %e, "Conflicting settlement for order");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        match &transition {
            Transition::Write(patch) => {
                store::with_timeout(
                    self.store_timeout,
                    self.store.update_order(order_id, patch.clone()),
                )
                .await
                .map_err(|e| match e {
                    StoreError::NotFound(id) => ReconcileError::OrderNotFound(id),
                    other => ReconcileError::Persistence(other),
                })?;
                info!(
                    %order_id,
                    %direction,
                    tx_id = %result.transaction_id,
                    payment_status = ?patch.payment_status,
                    "Order reconciled"
                );
            }
            Transition::AlreadyApplied => {
                debug!(%order_id, %direction, tx_id = %result.transaction_id, "Result already recorded");
            }
            Transition::Deferred => {
                warn!(%order_id, %direction, tx_id = %result.transaction_id, "Settlement outcome unknown, order left unchanged");
            }
            Transition::Retained => {
                info!(%order_id, %direction, payment_status = %order.payment_status, "Failure does not change order state");
            }
        }
        Ok(transition)
    }
}
