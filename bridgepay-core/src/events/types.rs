use crate::ledger::PendingHandle;
use crate::settlement::{Direction, SettlementResult};
use alloy::primitives::Address;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

/// A submitted transfer whose outcome is unknown.
#[derive(Debug, Clone)]
pub struct InDoubtSettlement {
    pub order_id: Uuid,
    pub direction: Direction,
    pub handle: PendingHandle,
    pub native_amount: Decimal,
    /// Payer for payments, recipient for refunds.
    pub counterparty: Option<Address>,
    pub detected_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub enum SettlementEvent {
    /// Confirmation wait timed out. Watch the same transaction; never resend.
    InDoubt(InDoubtSettlement),
    /// The ledger settled but the order write failed.
    Unrecorded {
        order_id: Uuid,
        direction: Direction,
        result: SettlementResult,
    },
}

impl SettlementEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            SettlementEvent::InDoubt(s) => s.order_id,
            SettlementEvent::Unrecorded { order_id, .. } => *order_id,
        }
    }
}
