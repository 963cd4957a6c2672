//! Runtime configuration for the settlement core.
//!
//! These are the validated values handed to constructors. Loading and
//! parsing the TOML file is the server's job.

mod config_store;

pub use config_store::{ConfigStore, ConfigWatcher};

use crate::rate::{ExchangeRate, RateError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Hard ceiling for a single confirmation wait.
pub const MAX_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Live exchange rate, swapped on reload.
pub type RateStore = ConfigStore<ExchangeRate>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    InvalidRate(#[from] RateError),

    #[error("confirmation timeout {0:?} exceeds the {MAX_CONFIRMATION_TIMEOUT:?} ceiling")]
    ConfirmationTimeoutTooLong(Duration),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0}")]
    Invalid(String),
}

/// What to do when a bank transfer carries more than the order total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverpaymentPolicy {
    /// Settle the order and log the excess.
    #[default]
    Accept,
    /// Refuse the notification; the excess needs manual handling.
    Reject,
}

#[derive(Debug, Clone)]
pub struct SettlementSettings {
    pub wallet_pool_size: usize,
    pub confirmation_timeout: Duration,
    /// Blocks on top of the inclusion block before a transfer counts as confirmed.
    pub required_confirmations: u64,
    /// Bound on every order store call.
    pub store_timeout: Duration,
    pub card_hash_salt: String,
    pub overpayment: OverpaymentPolicy,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            wallet_pool_size: 1,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            required_confirmations: 1,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            card_hash_salt: String::new(),
            overpayment: OverpaymentPolicy::Accept,
        }
    }
}

impl SettlementSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wallet_pool_size == 0 {
            return Err(ConfigError::Zero("wallet_pool_size"));
        }
        if self.confirmation_timeout.is_zero() {
            return Err(ConfigError::Zero("confirmation_timeout_ms"));
        }
        if self.confirmation_timeout > MAX_CONFIRMATION_TIMEOUT {
            return Err(ConfigError::ConfirmationTimeoutTooLong(
                self.confirmation_timeout,
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::Zero("store_timeout_ms"));
        }
        if self.required_confirmations == 0 {
            return Err(ConfigError::Zero("required_confirmations"));
        }
        Ok(())
    }
}

/// Memo parsing rules for bank-transfer notifications.
#[derive(Debug, Clone)]
pub struct MemoPatterns {
    /// Prefix of order numbers, e.g. `ORD` in `ORD123`.
    pub order_prefix: String,
    /// Words that precede an order number, e.g. `DH 123`.
    pub labels: Vec<String>,
    /// Minimum digit run accepted by the numeric fallback.
    pub min_numeric_digits: usize,
}

impl Default for MemoPatterns {
    fn default() -> Self {
        Self {
            order_prefix: "ORD".to_string(),
            labels: vec!["DH".to_string(), "DONHANG".to_string(), "ORDER".to_string()],
            min_numeric_digits: 6,
        }
    }
}

impl MemoPatterns {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.order_prefix.is_empty() || !self.order_prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Invalid(
                "webhook.order_prefix must be a non-empty alphanumeric word".to_string(),
            ));
        }
        if self.min_numeric_digits == 0 {
            return Err(ConfigError::Zero("webhook.min_numeric_digits"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        SettlementSettings::default().validate().unwrap();
        MemoPatterns::default().validate().unwrap();
    }

    #[test]
    fn test_timeout_ceiling() {
        let settings = SettlementSettings {
            confirmation_timeout: MAX_CONFIRMATION_TIMEOUT + Duration::from_millis(1),
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::ConfirmationTimeoutTooLong(_))
        ));
    }

    #[test]
    fn test_zero_pool() {
        let settings = SettlementSettings {
            wallet_pool_size: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Zero(_))));
    }

    #[test]
    fn test_overpayment_policy_serde() {
        let policy: OverpaymentPolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(policy, OverpaymentPolicy::Reject);
    }
}
