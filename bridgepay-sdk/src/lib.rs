//! Wire types shared between the BridgePay server and its callers.
//!
//! - [`objects`] holds request/response payloads and the public status enums.
//! - [`signature`] implements the HMAC scheme used to authenticate
//!   bank-transfer notifications.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(unsafe_code)]

pub mod objects;
pub mod signature;
