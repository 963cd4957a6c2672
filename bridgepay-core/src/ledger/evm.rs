//! JSON-RPC ledger client for EVM chains.

use super::{
    Confirmation, ConfirmationStatus, DEFAULT_REQUEST_TIMEOUT, LedgerClient, LedgerError,
    PendingHandle, SubmitError, TRANSFER_GAS_LIMIT,
};
use crate::rate::{from_base_units, to_base_units};
use crate::wallet::{Signer, UnsignedTransfer};
use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use url::Url;

fn transport(e: RpcError<TransportErrorKind>) -> LedgerError {
    LedgerError::Transport(e.to_string())
}

/// Run one RPC call, giving up after `limit`.
async fn rpc<T>(
    limit: Duration,
    call: impl IntoFuture<Output = Result<T, RpcError<TransportErrorKind>>>,
) -> Result<T, LedgerError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| LedgerError::Timeout(limit))?
        .map_err(transport)
}

pub struct EvmLedger {
    provider: DynProvider,
    chain_id: u64,
    required_confirmations: u64,
    poll_interval: Duration,
    request_timeout: Duration,
    /// One async lock per sending account, held from nonce lookup to broadcast.
    nonce_locks: Mutex<HashMap<Address, Arc<tokio::sync::Mutex<()>>>>,
}

impl EvmLedger {
    /// Connect to `endpoint` and read its chain id.
    pub async fn connect(endpoint: &Url, required_confirmations: u64) -> Result<Self, LedgerError> {
        let provider = ProviderBuilder::new()
            .connect_http(endpoint.clone())
            .erased();
        let chain_id = rpc(DEFAULT_REQUEST_TIMEOUT, provider.get_chain_id()).await?;
        info!(%endpoint, chain_id, required_confirmations, "Connected to ledger");
        Ok(Self {
            provider,
            chain_id,
            required_confirmations: required_confirmations.max(1),
            poll_interval: Duration::from_secs(2),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            nonce_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn nonce_lock(&self, account: Address) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.nonce_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(account).or_default())
    }
}

/// Node error messages that mean the transfer can never succeed as sent.
fn is_definitive_refusal(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    !message.contains("already known") && !message.contains("known transaction")
}

#[async_trait]
impl LedgerClient for EvmLedger {
    async fn submit_transfer(
        &self,
        signer: &dyn Signer,
        to: Address,
        amount: Decimal,
    ) -> Result<PendingHandle, SubmitError> {
        let value = to_base_units(amount).map_err(|e| SubmitError::NotSubmitted(e.into()))?;
        let from = signer.address();

        let lock = self.nonce_lock(from);
        let _guard = lock.lock().await;

        let limit = self.request_timeout;
        let nonce = rpc(limit, self.provider.get_transaction_count(from).pending())
            .await
            .map_err(SubmitError::NotSubmitted)?;
        let gas_price = rpc(limit, self.provider.get_gas_price())
            .await
            .map_err(SubmitError::NotSubmitted)?;
        let signed = signer
            .sign(&UnsignedTransfer {
                chain_id: self.chain_id,
                nonce,
                gas_price,
                gas_limit: TRANSFER_GAS_LIMIT,
                from,
                to,
                value,
            })
            .map_err(|e| SubmitError::NotSubmitted(e.into()))?;

        let handle = PendingHandle {
            tx_id: signed.tx_id,
            from,
            to,
            value,
            submitted_at: OffsetDateTime::now_utc(),
        };
        debug!(tx_id = %handle.tx_id, %from, %to, nonce, "Broadcasting transfer");

        let sent = tokio::time::timeout(limit, self.provider.send_raw_transaction(&signed.raw)).await;
        let Ok(sent) = sent else {
            warn!(tx_id = %handle.tx_id, timeout = ?limit, "Broadcast unanswered");
            return Err(SubmitError::InDoubt {
                handle,
                detail: LedgerError::Timeout(limit).to_string(),
            });
        };
        match sent {
            Ok(_) => Ok(handle),
            Err(e) => match e.as_error_resp() {
                Some(resp) if is_definitive_refusal(&resp.message) => {
                    warn!(tx_id = %handle.tx_id, error = %resp.message, "Ledger refused transfer");
                    Err(SubmitError::Rejected(resp.message.to_string()))
                }
                _ => Err(SubmitError::InDoubt {
                    handle,
                    detail: e.to_string(),
                }),
            },
        }
    }

    async fn check_confirmation(
        &self,
        handle: &PendingHandle,
    ) -> Result<ConfirmationStatus, LedgerError> {
        let limit = self.request_timeout;
        let Some(receipt) = rpc(limit, self.provider.get_transaction_receipt(handle.tx_id)).await?
        else {
            return Ok(ConfirmationStatus::Pending);
        };
        let Some(block_number) = receipt.block_number else {
            return Ok(ConfirmationStatus::Pending);
        };
        if !receipt.status() {
            return Ok(ConfirmationStatus::Reverted {
                block_number: Some(block_number),
                detail: "execution reverted".to_string(),
            });
        }

        let head = rpc(limit, self.provider.get_block_number()).await?;
        if head.saturating_sub(block_number) + 1 < self.required_confirmations {
            return Ok(ConfirmationStatus::Pending);
        }

        let fee_wei = u128::from(receipt.gas_used).saturating_mul(receipt.effective_gas_price);
        Ok(ConfirmationStatus::Included(Confirmation {
            tx_id: handle.tx_id,
            block_number,
            fee_used: from_base_units(fee_wei)?,
        }))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rpc_call_is_bounded() {
        let limit = Duration::from_secs(3);
        let stuck = std::future::pending::<Result<u64, RpcError<TransportErrorKind>>>();
        assert!(matches!(
            rpc(limit, stuck).await,
            Err(LedgerError::Timeout(d)) if d == limit
        ));
        let answered = async { Ok::<_, RpcError<TransportErrorKind>>(7u64) };
        assert_eq!(rpc(limit, answered).await.unwrap(), 7);
    }

    #[test]
    fn test_refusal_classification() {
        assert!(is_definitive_refusal(
            "insufficient funds for gas * price + value"
        ));
        assert!(is_definitive_refusal("execution reverted"));
        assert!(!is_definitive_refusal("already known"));
        assert!(!is_definitive_refusal("Known transaction: 0xabc"));
    }
}
