#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod card;
pub mod config;
pub mod entities;
pub mod events;
pub mod framework;
pub mod ledger;
pub mod processors;
pub mod rate;
pub mod reconcile;
pub mod service;
pub mod settlement;
pub mod store;
pub mod utils;
pub mod wallet;
pub mod webhook;
