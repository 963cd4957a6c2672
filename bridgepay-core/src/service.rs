//! The payment facade used by the UI layer and the webhook listener.
//!
//! Every operation that can move money for an order runs under that
//! order's lock and re-reads the order inside it, so two concurrent
//! attempts cannot both submit. Submission, the confirmation wait and
//! reconciliation run on their own task holding the order lock, so they
//! complete even if the caller goes away mid-broadcast.

use crate::card::{CardError, CardIdentityMapper, CardPresentment};
use crate::config::{MemoPatterns, RateStore, SettlementSettings};
use crate::entities::order_records::OrderRecord;
use crate::entities::{OrderStatus, PaymentStatus};
use crate::events::{InDoubtRegistry, InDoubtSettlement, SettlementEvent, SettlementEventSender};
use crate::ledger::LedgerClient;
use crate::processors::SettlementWatcher;
use crate::rate::RateError;
use crate::reconcile::{ReconcileError, Reconciler};
use crate::settlement::{
    BuiltSettlement, Direction, OrderGuard, OrderLocks, SettlementEngine, SettlementError,
    SettlementRequest, SettlementResult,
};
use crate::store::{OrderStore, StoreError};
use crate::wallet::{Signer, WalletPool};
use crate::webhook::{MatchError, WebhookMatcher};
use alloy::primitives::Address;
use bridgepay_sdk::objects::{BankTransferNotification, NotificationAck};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error(transparent)]
    InvalidCardFormat(#[from] CardError),

    #[error(transparent)]
    InvalidRate(#[from] RateError),

    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("order number not found: {0}")]
    OrderNumberNotFound(String),

    #[error("persistence error: {0}")]
    PersistenceError(StoreError),

    /// Money moved on the ledger but the order could not be updated.
    #[error("order {order_id} settled by {transaction_id} but not recorded: {source}")]
    PartialSettlement {
        order_id: Uuid,
        transaction_id: String,
        #[source]
        source: ReconcileError,
    },

    #[error("order {0} is already paid")]
    AlreadyPaid(Uuid),

    #[error("order {order_id} cannot be paid in state {payment_status}/{order_status}")]
    NotPayable {
        order_id: Uuid,
        payment_status: PaymentStatus,
        order_status: OrderStatus,
    },

    #[error("order {order_number} cannot be refunded in state {payment_status}")]
    NotRefundable {
        order_number: String,
        payment_status: PaymentStatus,
    },

    #[error("order {0} has a settlement in progress, check its status later")]
    SettlementInDoubt(Uuid),

    #[error("order {0} has no recorded payer to refund")]
    NoCounterparty(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("order state rejected the settlement: {0}")]
    Reconcile(ReconcileError),

    #[error("settlement task was interrupted")]
    Interrupted,
}

impl From<ReconcileError> for PaymentError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::OrderNotFound(id) => PaymentError::OrderNotFound(id),
            ReconcileError::OrderNumberNotFound(n) => PaymentError::OrderNumberNotFound(n),
            ReconcileError::Persistence(e) => PaymentError::PersistenceError(e),
            other => PaymentError::Reconcile(other),
        }
    }
}

impl From<SettlementError> for PaymentError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::InvalidRate(e) => PaymentError::InvalidRate(e),
            SettlementError::InvalidRequest(reason) => PaymentError::InvalidRequest(reason.to_string()),
        }
    }
}

/// Everything the service is assembled from.
pub struct ServiceParts {
    pub settings: SettlementSettings,
    pub memo_patterns: MemoPatterns,
    pub pool: WalletPool,
    pub store: Arc<dyn OrderStore>,
    pub ledger: Arc<dyn LedgerClient>,
    /// Receives payments and funds refunds.
    pub platform: Arc<dyn Signer>,
    pub rates: RateStore,
}

struct Inner {
    mapper: CardIdentityMapper,
    engine: SettlementEngine,
    reconciler: Reconciler,
    matcher: WebhookMatcher,
    rates: RateStore,
    locks: OrderLocks,
    registry: InDoubtRegistry,
    events: SettlementEventSender,
}

#[derive(Clone)]
pub struct PaymentService {
    inner: Arc<Inner>,
}

impl PaymentService {
    pub fn new(parts: ServiceParts, events: SettlementEventSender) -> Self {
        let ServiceParts {
            settings,
            memo_patterns,
            pool,
            store,
            ledger,
            platform,
            rates,
        } = parts;
        let reconciler = Reconciler::new(store, settings.store_timeout);
        let matcher = WebhookMatcher::new(reconciler.clone(), memo_patterns, settings.overpayment);
        Self {
            inner: Arc::new(Inner {
                mapper: CardIdentityMapper::new(settings.card_hash_salt, pool),
                engine: SettlementEngine::new(ledger, platform, settings.confirmation_timeout),
                reconciler,
                matcher,
                rates,
                locks: OrderLocks::new(),
                registry: InDoubtRegistry::new(),
                events,
            }),
        }
    }

    /// The watcher that resolves this service's unresolved settlements.
    pub fn settlement_watcher(&self) -> SettlementWatcher {
        SettlementWatcher::new(
            self.inner.engine.ledger(),
            self.inner.reconciler.clone(),
            self.inner.locks.clone(),
            self.inner.registry.clone(),
        )
    }

    pub fn rates(&self) -> &RateStore {
        &self.inner.rates
    }

    pub fn in_doubt(&self) -> &InDoubtRegistry {
        &self.inner.registry
    }

    pub async fn order(&self, order_id: Uuid) -> Result<OrderRecord, PaymentError> {
        Ok(self.inner.reconciler.load(order_id).await?)
    }

    /// Pay for an order with a card.
    pub async fn process_payment(
        &self,
        order_id: Uuid,
        card: CardPresentment,
    ) -> Result<SettlementResult, PaymentError> {
        let account = self.inner.mapper.derive_account(&card)?;
        drop(card);

        let guard = self.inner.locks.lock(order_id).await;
        if self.inner.registry.contains(order_id) {
            return Err(PaymentError::SettlementInDoubt(order_id));
        }
        let order = self.inner.reconciler.load(order_id).await?;
        match (order.payment_status, order.order_status) {
            (PaymentStatus::Paid, _) => return Err(PaymentError::AlreadyPaid(order_id)),
            (status, order_status) if !status.accepts_payment() || order_status == OrderStatus::Cancelled => {
                return Err(PaymentError::NotPayable {
                    order_id,
                    payment_status: status,
                    order_status,
                });
            }
            _ => {}
        }

        let rate = self.inner.rates.snapshot().await;
        let request = SettlementRequest::payment(
            order.order_id,
            order.order_number,
            order.total,
            rate,
            &account,
        );
        let built = self.inner.engine.build(request)?;
        info!(
            %order_id,
            pool_index = account.index,
            payer = %account.account_address,
            "Processing card payment"
        );
        self.settle(guard, Direction::Payment, built).await
    }

    /// Refund a paid order to the account that paid it.
    pub async fn issue_refund(&self, order_number: &str) -> Result<SettlementResult, PaymentError> {
        let order_id = self.inner.reconciler.load_by_number(order_number).await?.order_id;

        let guard = self.inner.locks.lock(order_id).await;
        if self.inner.registry.contains(order_id) {
            return Err(PaymentError::SettlementInDoubt(order_id));
        }
        let order = self.inner.reconciler.load(order_id).await?;
        if order.payment_status != PaymentStatus::Paid {
            return Err(PaymentError::NotRefundable {
                order_number: order.order_number,
                payment_status: order.payment_status,
            });
        }
        let counterparty = order
            .payer_address
            .as_deref()
            .and_then(|a| a.parse::<Address>().ok())
            .ok_or_else(|| PaymentError::NoCounterparty(order.order_number.clone()))?;

        let rate = self.inner.rates.snapshot().await;
        let request = SettlementRequest::refund(
            order.order_id,
            order.order_number,
            order.total,
            rate,
            Some(counterparty),
        );
        let built = self.inner.engine.build(request)?;
        info!(%order_id, %counterparty, "Issuing refund");
        self.settle(guard, Direction::Refund, built).await
    }

    /// Apply a bank-transfer notification. Safe to call again for the same
    /// notification.
    pub async fn reconcile_from_notification(
        &self,
        notification: BankTransferNotification,
    ) -> Result<NotificationAck, PaymentError> {
        let matched = match self.inner.matcher.match_notification(&notification).await {
            Ok(matched) => matched,
            Err(MatchError::Reconcile(ReconcileError::Persistence(e))) => {
                return Err(PaymentError::PersistenceError(e));
            }
            Err(e) => {
                warn!(provider_tx_id = %notification.provider_tx_id, error = %e, "Unmatched bank transfer");
                return Ok(NotificationAck::rejected(e.to_string()));
            }
        };

        let _guard = self.inner.locks.lock(matched.order_id).await;
        if self.inner.registry.contains(matched.order_id) {
            // the provider redelivers once the card settlement is resolved
            warn!(
                order_id = %matched.order_id,
                provider_tx_id = %notification.provider_tx_id,
                "Bank transfer for an order with an unresolved card settlement, deferring"
            );
            return Err(PaymentError::SettlementInDoubt(matched.order_id));
        }
        let result = self.inner.matcher.settlement_result(&matched, &notification);
        match self
            .inner
            .reconciler
            .apply_result(matched.order_id, Direction::Payment, &result)
            .await
        {
            Ok(_) if result.is_success() => Ok(NotificationAck::accepted()),
            Ok(_) => Ok(NotificationAck::rejected(
                result.error_detail.unwrap_or_else(|| "rejected".to_string()),
            )),
            Err(ReconcileError::Persistence(e)) => Err(PaymentError::PersistenceError(e)),
            Err(e) => Ok(NotificationAck::rejected(e.to_string())),
        }
    }

    /// Drive a built settlement to an outcome on its own task.
    async fn settle(
        &self,
        guard: OrderGuard,
        direction: Direction,
        built: BuiltSettlement,
    ) -> Result<SettlementResult, PaymentError> {
        let order_id = built.order_id();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = guard;
            inner.settle(direction, built).await
        });
        task.await.map_err(|e| {
            error!(%order_id, error = %e, "Settlement task failed");
            PaymentError::Interrupted
        })?
    }
}

impl Inner {
    async fn settle(
        &self,
        direction: Direction,
        built: BuiltSettlement,
    ) -> Result<SettlementResult, PaymentError> {
        let order_id = built.order_id();
        let native_amount = built.native_amount();
        let submitted = match built.submit().await {
            Ok(submitted) => submitted,
            Err(result) if result.is_timed_out() => {
                // no transaction id to poll, so only an operator can resolve it
                self.registry.insert(order_id);
                error!(
                    %order_id,
                    %direction,
                    %native_amount,
                    "Submission unanswered, order held for manual reconciliation"
                );
                return Ok(result);
            }
            Err(result) => {
                // nothing is pending on the ledger
                self.reconciler
                    .apply_result(order_id, direction, &result)
                    .await?;
                return Ok(result);
            }
        };

        let handle = submitted.handle().clone();
        let result = submitted.confirm().await;

        if result.is_timed_out() {
            self.registry.insert(order_id);
            let counterparty = match direction {
                Direction::Payment => Some(handle.from),
                Direction::Refund => Some(handle.to),
            };
            let event = SettlementEvent::InDoubt(InDoubtSettlement {
                order_id,
                direction,
                handle,
                native_amount,
                counterparty,
                detected_at: OffsetDateTime::now_utc(),
            });
            if self.events.send(event).await.is_err() {
                error!(%order_id, tx_id = %result.transaction_id, "Settlement watcher is gone, in-doubt transfer needs manual follow-up");
            }
            return Ok(result);
        }

        match self.reconciler.apply_result(order_id, direction, &result).await {
            Ok(_) => Ok(result),
            Err(source) if result.is_success() => {
                error!(
                    %order_id,
                    %direction,
                    tx_id = %result.transaction_id,
                    error = %source,
                    "PARTIAL SETTLEMENT: ledger transfer confirmed but order not updated"
                );
                if matches!(source, ReconcileError::Persistence(_)) {
                    self.registry.insert(order_id);
                    let event = SettlementEvent::Unrecorded {
                        order_id,
                        direction,
                        result: result.clone(),
                    };
                    if self.events.send(event).await.is_err() {
                        error!(%order_id, "Settlement watcher is gone, unrecorded transfer needs manual follow-up");
                    }
                }
                Err(PaymentError::PartialSettlement {
                    order_id,
                    transaction_id: result.transaction_id,
                    source,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, OverpaymentPolicy};
    use crate::events::{SettlementEventReceiver, settlement_event_channel};
    use crate::ledger::{SimulatedBehavior, SimulatedLedger};
    use crate::rate::ExchangeRate;
    use crate::settlement::{FailureReason, SettlementOutcome};
    use crate::store::MemoryOrderStore;
    use crate::wallet::LocalSigner;
    use rust_decimal::Decimal;
    use std::time::Duration;

    struct Harness {
        service: PaymentService,
        store: Arc<MemoryOrderStore>,
        ledger: Arc<SimulatedLedger>,
        events: SettlementEventReceiver,
    }

    fn settings(confirmation_timeout: Duration) -> SettlementSettings {
        SettlementSettings {
            wallet_pool_size: 3,
            confirmation_timeout,
            card_hash_salt: "test-salt".to_string(),
            ..Default::default()
        }
    }

    fn harness(confirmation_timeout: Duration) -> Harness {
        harness_with(settings(confirmation_timeout))
    }

    fn harness_with(settings: SettlementSettings) -> Harness {
        let signers = (0..3)
            .map(|_| (Arc::new(LocalSigner::random()) as Arc<dyn Signer>, Decimal::from(50)))
            .collect();
        let pool = WalletPool::from_signers(signers).unwrap();
        let ledger = Arc::new(SimulatedLedger::from_pool(&pool).unwrap());
        let platform = Arc::new(LocalSigner::random());
        ledger.fund(platform.address(), Decimal::from(100)).unwrap();
        let store = Arc::new(MemoryOrderStore::new());
        let (tx, rx) = settlement_event_channel();
        let service = PaymentService::new(
            ServiceParts {
                settings,
                memo_patterns: MemoPatterns::default(),
                pool,
                store: store.clone(),
                ledger: ledger.clone(),
                platform,
                rates: ConfigStore::new(ExchangeRate::new(Decimal::from(25_000)).unwrap()),
            },
            tx,
        );
        Harness {
            service,
            store,
            ledger,
            events: rx,
        }
    }

    fn card() -> CardPresentment {
        CardPresentment {
            card_number: "4532111111111234".to_string(),
            holder_name: "NGUYEN VAN A".to_string(),
            expiry: "12/27".to_string(),
            cvv: "123".to_string(),
        }
    }

    async fn order(h: &Harness, number: &str, total: i64) -> Uuid {
        let order = OrderRecord::new_pending(number, Decimal::from(total));
        let id = order.order_id;
        h.store.insert(order).await;
        id
    }

    #[tokio::test]
    async fn test_end_to_end_payment() {
        let h = harness(Duration::from_secs(5));
        let id = order(&h, "ORD123", 250_000).await;

        let result = h.service.process_payment(id, card()).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.native_amount, Decimal::from(10));

        let order = h.service.order(id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.order_status, OrderStatus::Confirmed);
        assert_eq!(order.transaction_id.as_deref(), Some(result.transaction_id.as_str()));
        assert!(order.paid_at.is_some());
    }

    #[tokio::test]
    async fn test_same_card_pays_from_same_account() {
        let h = harness(Duration::from_secs(5));
        let a = order(&h, "ORD1", 25_000).await;
        let b = order(&h, "ORD2", 25_000).await;
        h.service.process_payment(a, card()).await.unwrap();
        h.service.process_payment(b, card()).await.unwrap();
        let a = h.service.order(a).await.unwrap();
        let b = h.service.order(b).await.unwrap();
        assert!(a.payer_address.is_some());
        assert_eq!(a.payer_address, b.payer_address);
    }

    #[tokio::test]
    async fn test_concurrent_payments_submit_once() {
        let h = harness(Duration::from_secs(5));
        let id = order(&h, "ORD5", 25_000).await;
        let (first, second) = tokio::join!(
            h.service.process_payment(id, card()),
            h.service.process_payment(id, card())
        );
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(PaymentError::AlreadyPaid(_)))));
        assert_eq!(h.ledger.submission_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_order_pending_and_blocks_retry() {
        let mut h = harness(Duration::from_secs(2));
        let id = order(&h, "ORD6", 25_000).await;
        h.ledger.script([SimulatedBehavior::Hang]);

        let result = h.service.process_payment(id, card()).await.unwrap();
        assert!(result.is_timed_out());
        assert_eq!(
            h.service.order(id).await.unwrap().payment_status,
            PaymentStatus::Pending
        );
        assert!(matches!(
            h.service.process_payment(id, card()).await,
            Err(PaymentError::SettlementInDoubt(_))
        ));
        assert_eq!(h.ledger.submission_count(), 1);

        let Some(SettlementEvent::InDoubt(settlement)) = h.events.recv().await else {
            panic!("expected an in-doubt event");
        };
        assert_eq!(settlement.order_id, id);
        assert_eq!(settlement.handle.tx_id.to_string(), result.transaction_id);
    }

    #[tokio::test]
    async fn test_rejected_payment_marks_failed_and_can_be_retried() {
        let h = harness(Duration::from_secs(5));
        let id = order(&h, "ORD7", 25_000).await;
        h.ledger.script([SimulatedBehavior::Revert]);

        let result = h.service.process_payment(id, card()).await.unwrap();
        assert_eq!(result.outcome, SettlementOutcome::Failure(FailureReason::Rejected));
        assert_eq!(
            h.service.order(id).await.unwrap().payment_status,
            PaymentStatus::Failed
        );

        let retry = h.service.process_payment(id, card()).await.unwrap();
        assert!(retry.is_success());
        assert_eq!(
            h.service.order(id).await.unwrap().payment_status,
            PaymentStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let h = harness(Duration::from_secs(5));
        // 80 native units against a 50 unit account
        let id = order(&h, "ORD8", 2_000_000).await;
        let result = h.service.process_payment(id, card()).await.unwrap();
        assert!(!result.is_success());
        assert!(result.error_detail.unwrap().contains("insufficient funds"));
        assert_eq!(h.ledger.submission_count(), 0);
        assert_eq!(
            h.service.order(id).await.unwrap().payment_status,
            PaymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_invalid_card_never_reaches_ledger() {
        let h = harness(Duration::from_secs(5));
        let id = order(&h, "ORD9", 25_000).await;
        let mut bad = card();
        bad.card_number = "1234".to_string();
        assert!(matches!(
            h.service.process_payment(id, bad).await,
            Err(PaymentError::InvalidCardFormat(_))
        ));
        assert!(matches!(
            h.service.process_payment(Uuid::now_v7(), card()).await,
            Err(PaymentError::OrderNotFound(_))
        ));
        assert_eq!(h.ledger.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_settlement_is_distinct() {
        let mut h = harness(Duration::from_secs(5));
        let id = order(&h, "ORD10", 25_000).await;
        h.store.set_fail_updates(true);

        let err = h.service.process_payment(id, card()).await.unwrap_err();
        assert!(matches!(err, PaymentError::PartialSettlement { order_id, .. } if order_id == id));
        assert_eq!(h.ledger.submission_count(), 1);
        assert!(h.service.in_doubt().contains(id));
        assert!(matches!(
            h.events.recv().await,
            Some(SettlementEvent::Unrecorded { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_still_reconciles() {
        let h = harness(Duration::from_secs(30));
        let id = order(&h, "ORD11", 25_000).await;
        h.ledger.script([SimulatedBehavior::Hang]);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), h.service.process_payment(id, card()))
                .await;
        assert!(abandoned.is_err());

        assert_eq!(h.ledger.release_all(SimulatedBehavior::Confirm), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            h.service.order(id).await.unwrap().payment_status,
            PaymentStatus::Paid
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_dropped_during_submission_never_resubmits() {
        let h = harness(Duration::from_secs(30));
        let id = order(&h, "ORD13", 25_000).await;
        h.ledger
            .script([SimulatedBehavior::SlowAnswer(Duration::from_secs(5))]);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), h.service.process_payment(id, card()))
                .await;
        assert!(abandoned.is_err());

        // waits for the abandoned attempt to finish, then sees it paid
        assert!(matches!(
            h.service.process_payment(id, card()).await,
            Err(PaymentError::AlreadyPaid(_))
        ));
        assert_eq!(h.ledger.submission_count(), 1);
        assert_eq!(
            h.service.order(id).await.unwrap().payment_status,
            PaymentStatus::Paid
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_submission_is_bounded_and_holds_order() {
        let h = harness(Duration::from_secs(2));
        let id = order(&h, "ORD14", 25_000).await;
        h.ledger.script([SimulatedBehavior::NeverAnswer]);

        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            h.service.process_payment(id, card()),
        )
        .await
        .expect("payment must not hang")
        .unwrap();
        assert!(result.is_timed_out());
        assert!(result.transaction_id.is_empty());
        assert_eq!(
            h.service.order(id).await.unwrap().payment_status,
            PaymentStatus::Pending
        );
        assert!(h.service.in_doubt().contains(id));
        assert!(matches!(
            h.service.process_payment(id, card()).await,
            Err(PaymentError::SettlementInDoubt(_))
        ));
        assert_eq!(h.ledger.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_refund_returns_funds_to_payer() {
        let h = harness(Duration::from_secs(5));
        let id = order(&h, "ORD12", 250_000).await;
        h.service.process_payment(id, card()).await.unwrap();
        let payer: Address = h
            .service
            .order(id)
            .await
            .unwrap()
            .payer_address
            .unwrap()
            .parse()
            .unwrap();
        let before = h.ledger.balance(payer).unwrap();

        let result = h.service.issue_refund("ORD12").await.unwrap();
        assert!(result.is_success());
        assert_eq!(h.ledger.balance(payer).unwrap(), before + Decimal::from(10));

        let order = h.service.order(id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        assert_eq!(order.order_status, OrderStatus::Cancelled);
        assert_eq!(order.refund_tx_hash.as_deref(), Some(result.transaction_id.as_str()));

        assert!(matches!(
            h.service.issue_refund("ORD12").await,
            Err(PaymentError::NotRefundable { .. })
        ));
        assert!(matches!(
            h.service.issue_refund("ORD404").await,
            Err(PaymentError::OrderNumberNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bank_transfer_notifications() {
        let h = harness(Duration::from_secs(5));
        let id = order(&h, "ORD123", 100_000).await;
        let notification = |amount: i64| BankTransferNotification {
            amount: Decimal::from(amount),
            memo_text: "DH ORD123".to_string(),
            provider_tx_id: "FT24091".to_string(),
        };

        let ack = h
            .service
            .reconcile_from_notification(notification(90_000))
            .await
            .unwrap();
        assert!(!ack.accepted);
        assert_ne!(
            h.service.order(id).await.unwrap().payment_status,
            PaymentStatus::Paid
        );

        let ack = h
            .service
            .reconcile_from_notification(notification(100_000))
            .await
            .unwrap();
        assert!(ack.accepted);
        let writes = h.store.update_count();

        // provider redelivery
        let ack = h
            .service
            .reconcile_from_notification(notification(100_000))
            .await
            .unwrap();
        assert!(ack.accepted);
        assert_eq!(h.store.update_count(), writes);

        let order = h.service.order(id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.transaction_id.as_deref(), Some("FT24091"));

        let unknown = BankTransferNotification {
            amount: Decimal::from(1),
            memo_text: "hello".to_string(),
            provider_tx_id: "FT2".to_string(),
        };
        assert!(!h.service.reconcile_from_notification(unknown).await.unwrap().accepted);
    }

    #[tokio::test]
    async fn test_refused_overpayment_leaves_order_pending() {
        let h = harness_with(SettlementSettings {
            overpayment: OverpaymentPolicy::Reject,
            ..settings(Duration::from_secs(5))
        });
        let id = order(&h, "ORD123", 100_000).await;
        let ack = h
            .service
            .reconcile_from_notification(BankTransferNotification {
                amount: Decimal::from(150_000),
                memo_text: "DH ORD123".to_string(),
                provider_tx_id: "FT3".to_string(),
            })
            .await
            .unwrap();
        assert!(!ack.accepted);
        assert_eq!(
            h.service.order(id).await.unwrap().payment_status,
            PaymentStatus::Pending
        );
        assert_eq!(h.store.update_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bank_transfer_deferred_while_card_settlement_unresolved() {
        let h = harness(Duration::from_secs(2));
        let id = order(&h, "ORD15", 25_000).await;
        h.ledger.script([SimulatedBehavior::Hang]);
        let result = h.service.process_payment(id, card()).await.unwrap();
        assert!(result.is_timed_out());

        let notification = BankTransferNotification {
            amount: Decimal::from(25_000),
            memo_text: "ORD15".to_string(),
            provider_tx_id: "FT4".to_string(),
        };
        assert!(matches!(
            h.service.reconcile_from_notification(notification).await,
            Err(PaymentError::SettlementInDoubt(order_id)) if order_id == id
        ));
        let order = h.service.order(id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(h.store.update_count(), 0);
    }
}
