//! Ledger client collaborator.
//!
//! A [`LedgerClient`] submits one native-unit transfer and reports on its
//! inclusion. Submission and confirmation are separate calls so that a
//! transfer whose confirmation wait timed out can be checked again later by
//! transaction id, without ever being sent a second time.

pub mod evm;
pub mod simulated;

pub use evm::EvmLedger;
pub use simulated::{SimulatedBehavior, SimulatedLedger};

use crate::rate::RateError;
use crate::wallet::{Signer, SignerError};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

/// Gas for a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Default bound on one ledger round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Ledger round trips made by one submission (nonce, gas price, broadcast).
pub const SUBMIT_ROUND_TRIPS: u32 = 3;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] RateError),

    #[error("unknown transaction {0}")]
    UnknownTransaction(B256),

    #[error("ledger did not answer within {0:?}")]
    Timeout(Duration),
}

/// Why a submission did not produce a clean [`PendingHandle`].
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Nothing left this process. Safe to report as not submitted.
    #[error("transfer not submitted: {0}")]
    NotSubmitted(LedgerError),

    /// The ledger refused the transfer (insufficient funds, revert on
    /// simulation). Definitive.
    #[error("transfer rejected: {0}")]
    Rejected(String),

    /// The transfer was signed and handed to the ledger but the answer was
    /// lost. It may still be included.
    #[error("transfer {} in doubt: {detail}", handle.tx_id)]
    InDoubt { handle: PendingHandle, detail: String },
}

/// A submitted transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingHandle {
    pub tx_id: B256,
    pub from: Address,
    pub to: Address,
    /// Value in base units (wei).
    pub value: u128,
    pub submitted_at: OffsetDateTime,
}

/// Inclusion details of a confirmed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_id: B256,
    pub block_number: u64,
    /// Fee paid, in native units.
    pub fee_used: Decimal,
}

/// Point-in-time view of a submitted transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// Not included yet, or not deep enough.
    Pending,
    Included(Confirmation),
    Reverted {
        block_number: Option<u64>,
        detail: String,
    },
}

/// Final answer of a bounded confirmation wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed(Confirmation),
    Rejected { detail: String },
    TimedOut,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Sign with `signer` and broadcast a transfer of `amount` native units
    /// to `to`. Implementations must not assign the same nonce twice for
    /// one sender.
    async fn submit_transfer(
        &self,
        signer: &dyn Signer,
        to: Address,
        amount: Decimal,
    ) -> Result<PendingHandle, SubmitError>;

    /// Ask once about a submitted transfer.
    async fn check_confirmation(
        &self,
        handle: &PendingHandle,
    ) -> Result<ConfirmationStatus, LedgerError>;

    /// Delay between confirmation checks.
    fn poll_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Bound on a single round trip to the ledger.
    fn request_timeout(&self) -> Duration {
        DEFAULT_REQUEST_TIMEOUT
    }

    /// Bound on a whole [`submit_transfer`](Self::submit_transfer) call.
    fn submit_timeout(&self) -> Duration {
        self.request_timeout() * SUBMIT_ROUND_TRIPS
    }

    /// Poll until the transfer is confirmed or reverted, or `timeout`
    /// elapses. Transport errors while polling are retried until the
    /// deadline.
    async fn await_confirmation(
        &self,
        handle: &PendingHandle,
        timeout: Duration,
    ) -> ConfirmationOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.check_confirmation(handle)).await {
                Err(_) => return ConfirmationOutcome::TimedOut,
                Ok(Ok(ConfirmationStatus::Included(confirmation))) => {
                    return ConfirmationOutcome::Confirmed(confirmation);
                }
                Ok(Ok(ConfirmationStatus::Reverted { detail, .. })) => {
                    return ConfirmationOutcome::Rejected { detail };
                }
                Ok(Ok(ConfirmationStatus::Pending)) => {}
                Ok(Err(e)) => {
                    warn!(tx_id = %handle.tx_id, error = %e, "Confirmation check failed, retrying");
                }
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return ConfirmationOutcome::TimedOut;
            }
            tokio::time::sleep(self.poll_interval().min(deadline - now)).await;
        }
    }
}

/// Ask once about a submitted transfer, bounded by the ledger's request
/// timeout.
pub async fn check_with_timeout(
    ledger: &dyn LedgerClient,
    handle: &PendingHandle,
) -> Result<ConfirmationStatus, LedgerError> {
    let limit = ledger.request_timeout();
    tokio::time::timeout(limit, ledger.check_confirmation(handle))
        .await
        .map_err(|_| LedgerError::Timeout(limit))?
}
