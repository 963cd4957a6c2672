//! Background processors.
//!
//! - `SettlementWatcher`: receives `SettlementEvent`, resolves in-doubt and
//!   unrecorded settlements through the reconciler

pub mod settlement_watcher;

pub use settlement_watcher::{CheckOutcome, SettlementWatcher};
