//! Settlement events.
//!
//! The payment path emits an event whenever money may have moved without
//! the order saying so. The [`SettlementWatcher`](crate::processors::SettlementWatcher)
//! consumes them and finishes the job later.
//!
//! # Event Flow
//!
//! 1. `PaymentService` times out waiting for a transfer -> `SettlementEvent::InDoubt`
//! 2. `PaymentService` fails to record a confirmed transfer -> `SettlementEvent::Unrecorded`
//! 3. `SettlementWatcher` polls the ledger / retries the write, then reconciles

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, InDoubtRegistry, SettlementEventReceiver, SettlementEventSender,
    settlement_event_channel,
};
pub use types::{InDoubtSettlement, SettlementEvent};
