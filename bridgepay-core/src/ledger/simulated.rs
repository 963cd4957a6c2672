//! In-memory ledger.
//!
//! Keeps balances in base units, signs every transfer with the real signer
//! and "mines" it immediately according to a scripted behaviour. Used by the
//! `simulated` ledger mode and by tests.

use super::{
    Confirmation, ConfirmationStatus, LedgerClient, LedgerError, PendingHandle, SubmitError,
    TRANSFER_GAS_LIMIT,
};
use crate::rate::{from_base_units, to_base_units};
use crate::wallet::{Signer, UnsignedTransfer, WalletPool};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

pub const SIMULATED_CHAIN_ID: u64 = 1337;
/// 1 gwei.
pub const SIMULATED_GAS_PRICE: u128 = 1_000_000_000;

/// What happens to the next submitted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedBehavior {
    /// Included in the next block.
    Confirm,
    /// Included but reverted; only the fee is charged.
    Revert,
    /// Accepted but never included until [`SimulatedLedger::release`].
    Hang,
    /// Refused by the node at submission.
    RejectOnSubmit,
    /// Connection fails before anything is sent.
    FailBeforeSubmit,
    /// Sent, but the node's answer is lost. The transfer is included.
    LoseResponse,
    /// Included, but the node answers the submission only after the delay.
    SlowAnswer(Duration),
    /// Sent and left hanging. The node never answers the submission.
    NeverAnswer,
}

#[derive(Debug, Clone)]
enum TxState {
    Pending,
    Included { block_number: u64 },
    Reverted { block_number: u64 },
}

#[derive(Debug, Clone)]
struct SimTx {
    from: Address,
    to: Address,
    value: u128,
    state: TxState,
}

#[derive(Debug, Default)]
struct State {
    balances: HashMap<Address, u128>,
    nonces: HashMap<Address, u64>,
    txs: HashMap<B256, SimTx>,
    block_number: u64,
    script: VecDeque<SimulatedBehavior>,
}

impl State {
    fn mine(&mut self, tx_id: B256, behavior: SimulatedBehavior) {
        let fee = u128::from(TRANSFER_GAS_LIMIT) * SIMULATED_GAS_PRICE;
        let Some(tx) = self.txs.get(&tx_id).cloned() else {
            return;
        };
        self.block_number += 1;
        let block_number = self.block_number;
        let debit = match behavior {
            SimulatedBehavior::Revert => fee,
            _ => tx.value + fee,
        };
        let from_balance = self.balances.entry(tx.from).or_default();
        *from_balance = from_balance.saturating_sub(debit);
        let state = if behavior == SimulatedBehavior::Revert {
            TxState::Reverted { block_number }
        } else {
            *self.balances.entry(tx.to).or_default() += tx.value;
            TxState::Included { block_number }
        };
        if let Some(tx) = self.txs.get_mut(&tx_id) {
            tx.state = state;
        }
    }
}

pub struct SimulatedLedger {
    state: Mutex<State>,
    default_behavior: SimulatedBehavior,
    submissions: AtomicUsize,
    poll_interval: Duration,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            default_behavior: SimulatedBehavior::Confirm,
            submissions: AtomicUsize::new(0),
            poll_interval: Duration::from_millis(10),
        }
    }

    /// A ledger whose balances start at the pool's starting balances.
    pub fn from_pool(pool: &WalletPool) -> Result<Self, LedgerError> {
        let ledger = Self::new();
        for entry in pool.entries() {
            ledger.fund(entry.address, entry.starting_balance)?;
        }
        Ok(ledger)
    }

    pub fn with_default_behavior(mut self, behavior: SimulatedBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Credit `amount` native units to `account`.
    pub fn fund(&self, account: Address, amount: Decimal) -> Result<(), LedgerError> {
        let value = to_base_units(amount)?;
        *self.state().balances.entry(account).or_default() += value;
        Ok(())
    }

    pub fn balance(&self, account: Address) -> Result<Decimal, LedgerError> {
        let value = self.state().balances.get(&account).copied().unwrap_or_default();
        Ok(from_base_units(value)?)
    }

    /// Queue behaviours for the next submissions, in order.
    pub fn script(&self, behaviors: impl IntoIterator<Item = SimulatedBehavior>) {
        self.state().script.extend(behaviors);
    }

    /// Number of transfers that reached the ledger.
    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Mine every hanging transfer. Returns how many were mined.
    pub fn release_all(&self, behavior: SimulatedBehavior) -> usize {
        let mut state = self.state();
        let pending: Vec<B256> = state
            .txs
            .iter()
            .filter(|(_, tx)| matches!(tx.state, TxState::Pending))
            .map(|(id, _)| *id)
            .collect();
        for tx_id in &pending {
            state.mine(*tx_id, behavior);
        }
        pending.len()
    }

    /// Mine a transfer left hanging by [`SimulatedBehavior::Hang`].
    pub fn release(&self, tx_id: B256, behavior: SimulatedBehavior) {
        let mut state = self.state();
        if matches!(state.txs.get(&tx_id).map(|tx| &tx.state), Some(TxState::Pending)) {
            state.mine(tx_id, behavior);
        }
    }

    /// Accept a transfer into the simulated chain. Returns the handle and
    /// the behaviour it was accepted with.
    fn accept(
        &self,
        signer: &dyn Signer,
        to: Address,
        amount: Decimal,
    ) -> Result<(PendingHandle, SimulatedBehavior), SubmitError> {
        let value = to_base_units(amount).map_err(|e| SubmitError::NotSubmitted(e.into()))?;
        let from = signer.address();
        let fee = u128::from(TRANSFER_GAS_LIMIT) * SIMULATED_GAS_PRICE;

        let mut state = self.state();
        let behavior = state.script.pop_front().unwrap_or(self.default_behavior);
        if behavior == SimulatedBehavior::FailBeforeSubmit {
            return Err(SubmitError::NotSubmitted(LedgerError::Transport(
                "simulated connection failure".to_string(),
            )));
        }
        if behavior == SimulatedBehavior::RejectOnSubmit {
            return Err(SubmitError::Rejected("simulated node refusal".to_string()));
        }
        let balance = state.balances.get(&from).copied().unwrap_or_default();
        if balance < value.saturating_add(fee) {
            return Err(SubmitError::Rejected(
                "insufficient funds for gas * price + value".to_string(),
            ));
        }

        let nonce = state.nonces.get(&from).copied().unwrap_or_default();
        let signed = signer
            .sign(&UnsignedTransfer {
                chain_id: SIMULATED_CHAIN_ID,
                nonce,
                gas_price: SIMULATED_GAS_PRICE,
                gas_limit: TRANSFER_GAS_LIMIT,
                from,
                to,
                value,
            })
            .map_err(|e| SubmitError::NotSubmitted(e.into()))?;
        state.nonces.insert(from, nonce + 1);
        state.txs.insert(
            signed.tx_id,
            SimTx {
                from,
                to,
                value,
                state: TxState::Pending,
            },
        );
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if !matches!(behavior, SimulatedBehavior::Hang | SimulatedBehavior::NeverAnswer) {
            state.mine(signed.tx_id, behavior);
        }
        debug!(tx_id = %signed.tx_id, %from, %to, nonce, ?behavior, "Simulated transfer");

        let handle = PendingHandle {
            tx_id: signed.tx_id,
            from,
            to,
            value,
            submitted_at: OffsetDateTime::now_utc(),
        };
        Ok((handle, behavior))
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn submit_transfer(
        &self,
        signer: &dyn Signer,
        to: Address,
        amount: Decimal,
    ) -> Result<PendingHandle, SubmitError> {
        let (handle, behavior) = self.accept(signer, to, amount)?;
        match behavior {
            SimulatedBehavior::LoseResponse => Err(SubmitError::InDoubt {
                handle,
                detail: "simulated lost response".to_string(),
            }),
            SimulatedBehavior::SlowAnswer(delay) => {
                tokio::time::sleep(delay).await;
                Ok(handle)
            }
            SimulatedBehavior::NeverAnswer => std::future::pending().await,
            _ => Ok(handle),
        }
    }

    async fn check_confirmation(
        &self,
        handle: &PendingHandle,
    ) -> Result<ConfirmationStatus, LedgerError> {
        let state = self.state();
        let tx = state
            .txs
            .get(&handle.tx_id)
            .ok_or(LedgerError::UnknownTransaction(handle.tx_id))?;
        let fee = from_base_units(u128::from(TRANSFER_GAS_LIMIT) * SIMULATED_GAS_PRICE)?;
        Ok(match tx.state {
            TxState::Pending => ConfirmationStatus::Pending,
            TxState::Included { block_number } => ConfirmationStatus::Included(Confirmation {
                tx_id: handle.tx_id,
                block_number,
                fee_used: fee,
            }),
            TxState::Reverted { block_number } => ConfirmationStatus::Reverted {
                block_number: Some(block_number),
                detail: "execution reverted".to_string(),
            },
        })
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ConfirmationOutcome;
    use crate::wallet::LocalSigner;

    fn funded(amount: i64) -> (SimulatedLedger, LocalSigner) {
        let ledger = SimulatedLedger::new();
        let signer = LocalSigner::random();
        ledger.fund(signer.address(), Decimal::from(amount)).unwrap();
        (ledger, signer)
    }

    #[tokio::test]
    async fn test_confirmed_transfer_moves_funds() {
        let (ledger, signer) = funded(20);
        let to = Address::repeat_byte(0x42);
        let handle = ledger
            .submit_transfer(&signer, to, Decimal::from(10))
            .await
            .unwrap();
        let outcome = ledger
            .await_confirmation(&handle, Duration::from_secs(1))
            .await;
        let ConfirmationOutcome::Confirmed(confirmation) = outcome else {
            panic!("expected confirmation, got {outcome:?}");
        };
        assert_eq!(confirmation.tx_id, handle.tx_id);
        assert_eq!(confirmation.block_number, 1);
        assert_eq!(confirmation.fee_used, Decimal::new(21, 6));
        assert_eq!(ledger.balance(to).unwrap(), Decimal::from(10));
        assert_eq!(
            ledger.balance(signer.address()).unwrap(),
            Decimal::from(10) - Decimal::new(21, 6)
        );
        assert_eq!(ledger.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_rejected_without_submission() {
        let (ledger, signer) = funded(5);
        let err = ledger
            .submit_transfer(&signer, Address::ZERO, Decimal::from(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Rejected(ref m) if m.contains("insufficient funds")));
        assert_eq!(ledger.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_revert_charges_fee_only() {
        let (ledger, signer) = funded(20);
        ledger.script([SimulatedBehavior::Revert]);
        let handle = ledger
            .submit_transfer(&signer, Address::ZERO, Decimal::from(10))
            .await
            .unwrap();
        assert!(matches!(
            ledger.await_confirmation(&handle, Duration::from_secs(1)).await,
            ConfirmationOutcome::Rejected { .. }
        ));
        assert_eq!(
            ledger.balance(signer.address()).unwrap(),
            Decimal::from(20) - Decimal::new(21, 6)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_times_out_then_release() {
        let (ledger, signer) = funded(20);
        ledger.script([SimulatedBehavior::Hang]);
        let handle = ledger
            .submit_transfer(&signer, Address::ZERO, Decimal::ONE)
            .await
            .unwrap();
        assert_eq!(
            ledger.await_confirmation(&handle, Duration::from_millis(200)).await,
            ConfirmationOutcome::TimedOut
        );
        ledger.release(handle.tx_id, SimulatedBehavior::Confirm);
        assert!(matches!(
            ledger.check_confirmation(&handle).await.unwrap(),
            ConfirmationStatus::Included(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_answer_is_included_before_the_reply() {
        let (ledger, signer) = funded(20);
        ledger.script([SimulatedBehavior::SlowAnswer(Duration::from_secs(5))]);
        let started = tokio::time::Instant::now();
        let handle = ledger
            .submit_transfer(&signer, Address::ZERO, Decimal::ONE)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(matches!(
            ledger.check_confirmation(&handle).await.unwrap(),
            ConfirmationStatus::Included(_)
        ));
    }

    #[tokio::test]
    async fn test_nonces_increase_per_sender() {
        let (ledger, signer) = funded(20);
        let a = ledger
            .submit_transfer(&signer, Address::ZERO, Decimal::ONE)
            .await
            .unwrap();
        let b = ledger
            .submit_transfer(&signer, Address::ZERO, Decimal::ONE)
            .await
            .unwrap();
        assert_ne!(a.tx_id, b.tx_id);
        assert_eq!(ledger.submission_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_before_submit() {
        let (ledger, signer) = funded(20);
        ledger.script([SimulatedBehavior::FailBeforeSubmit]);
        assert!(matches!(
            ledger
                .submit_transfer(&signer, Address::ZERO, Decimal::ONE)
                .await,
            Err(SubmitError::NotSubmitted(_))
        ));
        assert_eq!(ledger.submission_count(), 0);
    }
}
