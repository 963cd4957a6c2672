//! SettlementWatcher processor.
//!
//! The SettlementWatcher is responsible for:
//! - Receiving `SettlementEvent`s from the payment path
//! - Polling the ledger for in-doubt transfers by transaction id, with a
//!   back-off that grows the longer a transfer stays unresolved
//! - Retrying order writes for transfers that settled but were not recorded
//! - Clearing the order from the [`InDoubtRegistry`] once resolved
//!
//! It never submits a transfer.

use crate::events::{InDoubtRegistry, SettlementEvent, SettlementEventReceiver};
use crate::ledger::{ConfirmationStatus, LedgerClient, check_with_timeout};
use crate::reconcile::{ReconcileError, Reconciler};
use crate::settlement::{
    Direction, FailureReason, OrderLocks, SettlementOutcome, SettlementResult,
};
use crate::utils::polling_interval::settlement_poll_freq;
use kanau::processor::Processor;
use std::convert::Infallible;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one attempt at resolving an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Done; stop tracking.
    Resolved,
    /// Try again later.
    Pending,
}

struct Tracked {
    event: SettlementEvent,
    first_seen: OffsetDateTime,
    next_check: Instant,
}

impl Tracked {
    fn reschedule(&mut self) {
        let now = OffsetDateTime::now_utc();
        let delay = settlement_poll_freq(self.first_seen, now).unsigned_abs();
        self.next_check = Instant::now() + delay;
    }
}

pub struct SettlementWatcher {
    ledger: Arc<dyn LedgerClient>,
    reconciler: Reconciler,
    locks: OrderLocks,
    registry: InDoubtRegistry,
}

impl SettlementWatcher {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        reconciler: Reconciler,
        locks: OrderLocks,
        registry: InDoubtRegistry,
    ) -> Self {
        Self {
            ledger,
            reconciler,
            locks,
            registry,
        }
    }

    /// Run until shutdown is signalled.
    pub async fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut event_rx: SettlementEventReceiver,
    ) {
        info!("SettlementWatcher started");
        let mut tracked: Vec<Tracked> = Vec::new();

        loop {
            let next_due = tracked.iter().map(|t| t.next_check).min();
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("SettlementWatcher received shutdown signal");
                        break;
                    }
                }

                Some(event) = event_rx.recv() => {
                    debug!(order_id = %event.order_id(), "Tracking unresolved settlement");
                    let now = Instant::now();
                    let mut item = Tracked {
                        event,
                        first_seen: OffsetDateTime::now_utc(),
                        next_check: now,
                    };
                    item.reschedule();
                    tracked.push(item);
                }

                _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    let now = Instant::now();
                    let (due, waiting): (Vec<_>, Vec<_>) =
                        tracked.drain(..).partition(|t| t.next_check <= now);
                    tracked = waiting;
                    for mut item in due {
                        let Ok(outcome) = self.process(item.event.clone()).await;
                        if outcome == CheckOutcome::Pending {
                            item.reschedule();
                            tracked.push(item);
                        }
                    }
                }

                else => {
                    info!("Settlement event channel closed");
                    break;
                }
            }
        }

        if !tracked.is_empty() {
            warn!(
                unresolved = tracked.len(),
                "SettlementWatcher stopping with unresolved settlements"
            );
        }
        info!("SettlementWatcher shutdown complete");
    }

    async fn record(
        &self,
        order_id: Uuid,
        direction: Direction,
        result: &SettlementResult,
    ) -> CheckOutcome {
        match self.reconciler.apply_result(order_id, direction, result).await {
            Ok(transition) => {
                self.registry.remove(order_id);
                info!(%order_id, %direction, tx_id = %result.transaction_id, ?transition, "Unresolved settlement reconciled");
                CheckOutcome::Resolved
            }
            Err(ReconcileError::Persistence(e)) => {
                warn!(%order_id, %direction, error = %e, "Order write failed, will retry");
                CheckOutcome::Pending
            }
            Err(e) => {
                self.registry.remove(order_id);
                error!(
                    %order_id,
                    %direction,
                    tx_id = %result.transaction_id,
                    error = %e,
                    "Settlement cannot be reconciled automatically, manual reconciliation required"
                );
                CheckOutcome::Resolved
            }
        }
    }
}

impl Processor<SettlementEvent> for SettlementWatcher {
    type Output = CheckOutcome;
    type Error = Infallible;

    async fn process(&self, event: SettlementEvent) -> Result<CheckOutcome, Infallible> {
        let _guard = self.locks.lock(event.order_id()).await;
        match event {
            SettlementEvent::Unrecorded {
                order_id,
                direction,
                result,
            } => Ok(self.record(order_id, direction, &result).await),
            SettlementEvent::InDoubt(settlement) => {
                let tx_id = settlement.handle.tx_id.to_string();
                let result = match check_with_timeout(self.ledger.as_ref(), &settlement.handle).await {
                    Ok(ConfirmationStatus::Pending) => {
                        debug!(order_id = %settlement.order_id, %tx_id, "Transfer still pending");
                        return Ok(CheckOutcome::Pending);
                    }
                    Err(e) => {
                        warn!(order_id = %settlement.order_id, %tx_id, error = %e, "Ledger check failed");
                        return Ok(CheckOutcome::Pending);
                    }
                    Ok(ConfirmationStatus::Included(confirmation)) => SettlementResult {
                        outcome: SettlementOutcome::Success,
                        native_amount: settlement.native_amount,
                        transaction_id: tx_id,
                        block_reference: Some(confirmation.block_number),
                        fee_used: Some(confirmation.fee_used),
                        error_detail: None,
                        counterparty: settlement.counterparty.map(|a| a.to_string()),
                    },
                    Ok(ConfirmationStatus::Reverted { detail, .. }) => SettlementResult::failure(
                        FailureReason::Rejected,
                        settlement.native_amount,
                        tx_id,
                        detail,
                    ),
                };
                Ok(self
                    .record(settlement.order_id, settlement.direction, &result)
                    .await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::PaymentStatus;
    use crate::entities::order_records::OrderRecord;
    use crate::events::{InDoubtSettlement, settlement_event_channel};
    use crate::ledger::{SimulatedBehavior, SimulatedLedger};
    use crate::store::{MemoryOrderStore, OrderStore};
    use crate::wallet::{LocalSigner, Signer};
    use alloy::primitives::Address;
    use rust_decimal::Decimal;
    use std::time::Duration;

    struct Fixture {
        ledger: Arc<SimulatedLedger>,
        store: Arc<MemoryOrderStore>,
        registry: InDoubtRegistry,
        watcher: SettlementWatcher,
        order_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let ledger = Arc::new(SimulatedLedger::new());
        let store = Arc::new(MemoryOrderStore::new());
        let order = OrderRecord::new_pending("ORD1", Decimal::from(250_000));
        let order_id = order.order_id;
        store.insert(order).await;
        let registry = InDoubtRegistry::new();
        let watcher = SettlementWatcher::new(
            ledger.clone(),
            Reconciler::new(store.clone(), Duration::from_secs(1)),
            OrderLocks::new(),
            registry.clone(),
        );
        Fixture {
            ledger,
            store,
            registry,
            watcher,
            order_id,
        }
    }

    async fn hung_transfer(f: &Fixture) -> InDoubtSettlement {
        let signer = LocalSigner::random();
        f.ledger.fund(signer.address(), Decimal::from(20)).unwrap();
        f.ledger.script([SimulatedBehavior::Hang]);
        let handle = f
            .ledger
            .submit_transfer(&signer, Address::repeat_byte(1), Decimal::from(10))
            .await
            .unwrap();
        f.registry.insert(f.order_id);
        InDoubtSettlement {
            order_id: f.order_id,
            direction: Direction::Payment,
            handle,
            native_amount: Decimal::from(10),
            counterparty: Some(signer.address()),
            detected_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_in_doubt_resolves_to_paid_without_resubmitting() {
        let f = fixture().await;
        let settlement = hung_transfer(&f).await;
        let tx_id = settlement.handle.tx_id;

        let pending = f
            .watcher
            .process(SettlementEvent::InDoubt(settlement.clone()))
            .await
            .unwrap();
        assert_eq!(pending, CheckOutcome::Pending);
        assert!(f.registry.contains(f.order_id));

        f.ledger.release(tx_id, SimulatedBehavior::Confirm);
        let resolved = f
            .watcher
            .process(SettlementEvent::InDoubt(settlement))
            .await
            .unwrap();
        assert_eq!(resolved, CheckOutcome::Resolved);
        assert!(!f.registry.contains(f.order_id));

        let order = f.store.get_order(f.order_id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.transaction_id, Some(tx_id.to_string()));
        assert_eq!(f.ledger.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_in_doubt_revert_marks_failed() {
        let f = fixture().await;
        let settlement = hung_transfer(&f).await;
        f.ledger
            .release(settlement.handle.tx_id, SimulatedBehavior::Revert);
        f.watcher
            .process(SettlementEvent::InDoubt(settlement))
            .await
            .unwrap();
        let order = f.store.get_order(f.order_id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_unrecorded_retries_until_store_recovers() {
        let f = fixture().await;
        f.registry.insert(f.order_id);
        let event = SettlementEvent::Unrecorded {
            order_id: f.order_id,
            direction: Direction::Payment,
            result: SettlementResult {
                outcome: SettlementOutcome::Success,
                native_amount: Decimal::from(10),
                transaction_id: "0xabc".to_string(),
                block_reference: Some(3),
                fee_used: None,
                error_detail: None,
                counterparty: None,
            },
        };
        f.store.set_fail_updates(true);
        assert_eq!(
            f.watcher.process(event.clone()).await.unwrap(),
            CheckOutcome::Pending
        );
        f.store.set_fail_updates(false);
        assert_eq!(
            f.watcher.process(event).await.unwrap(),
            CheckOutcome::Resolved
        );
        assert!(f.registry.is_empty());
        let order = f.store.get_order(f.order_id).await.unwrap().unwrap();
        assert_eq!(order.transaction_id.as_deref(), Some("0xabc"));
    }

    struct Unresponsive;

    #[async_trait::async_trait]
    impl LedgerClient for Unresponsive {
        async fn submit_transfer(
            &self,
            _signer: &dyn Signer,
            _to: Address,
            _amount: Decimal,
        ) -> Result<crate::ledger::PendingHandle, crate::ledger::SubmitError> {
            std::future::pending().await
        }

        async fn check_confirmation(
            &self,
            _handle: &crate::ledger::PendingHandle,
        ) -> Result<ConfirmationStatus, crate::ledger::LedgerError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_ledger_check_does_not_stall_watcher() {
        let f = fixture().await;
        let settlement = hung_transfer(&f).await;
        let watcher = SettlementWatcher::new(
            Arc::new(Unresponsive),
            Reconciler::new(f.store.clone(), Duration::from_secs(1)),
            OrderLocks::new(),
            f.registry.clone(),
        );
        let outcome = tokio::time::timeout(
            Duration::from_secs(60),
            watcher.process(SettlementEvent::InDoubt(settlement)),
        )
        .await
        .expect("check must be bounded")
        .unwrap();
        assert_eq!(outcome, CheckOutcome::Pending);
        assert!(f.registry.contains(f.order_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_resolves_and_stops() {
        let f = fixture().await;
        let settlement = hung_transfer(&f).await;
        let tx_id = settlement.handle.tx_id;
        let (tx, rx) = settlement_event_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let store = f.store.clone();
        let registry = f.registry.clone();
        let ledger = f.ledger.clone();
        let order_id = f.order_id;

        let handle = tokio::spawn(f.watcher.run(shutdown_rx, rx));
        tx.send(SettlementEvent::InDoubt(settlement)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(registry.contains(order_id));

        ledger.release(tx_id, SimulatedBehavior::Confirm);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!registry.contains(order_id));
        assert_eq!(
            store.get_order(order_id).await.unwrap().unwrap().payment_status,
            PaymentStatus::Paid
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
