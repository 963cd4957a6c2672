//! TOML file configuration structures.
//!
//! These structs directly map to the `bridgepay.toml` file format.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub settlement: SettlementConfig,
    pub ledger: LedgerConfig,
    pub platform: AccountConfig,
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,
    pub webhook: WebhookConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Admin configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// The admin secret. If this is plaintext (doesn't start with `$argon2`),
    /// it will be hashed and the config file will be rewritten.
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Fiat units per one native unit.
    pub exchange_rate: Decimal,
    pub wallet_pool_size: usize,
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    pub card_hash_salt: String,
    #[serde(default)]
    pub overpayment: bridgepay_core::config::OverpaymentPolicy,
}

fn default_confirmation_timeout_ms() -> u64 {
    60_000
}

fn default_required_confirmations() -> u64 {
    1
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    /// A JSON-RPC node of an EVM chain.
    Evm,
    /// In-process ledger seeded from the wallet starting balances.
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub kind: LedgerKind,
    /// Required for `evm`.
    #[serde(default)]
    pub endpoint: Option<Url>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Bound on each RPC round trip.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

/// An account the bridge signs for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub address: String,
    /// Hex private key.
    pub key: String,
    /// Funds the simulated ledger starts with, in native units.
    #[serde(default)]
    pub starting_balance: Decimal,
}

/// Pool entry, same shape as [`AccountConfig`].
pub type WalletConfig = AccountConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret the payment provider signs notifications with.
    pub secret: String,
    #[serde(default = "default_order_prefix")]
    pub order_prefix: String,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    #[serde(default = "default_min_numeric_digits")]
    pub min_numeric_digits: usize,
}

fn default_order_prefix() -> String {
    "ORD".to_string()
}

fn default_labels() -> Vec<String> {
    vec!["DH".to_string(), "DONHANG".to_string(), "ORDER".to_string()]
}

fn default_min_numeric_digits() -> usize {
    6
}

impl FileConfig {
    /// Check if the admin secret is already hashed (argon2 format).
    pub fn is_admin_secret_hashed(&self) -> bool {
        self.admin.secret.starts_with("$argon2")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::str::FromStr;

    pub(crate) const SAMPLE: &str = r#"
[server]
listen = "127.0.0.1:3000"

[admin]
secret = "test-secret"

[settlement]
exchange_rate = "25000"
wallet_pool_size = 2
confirmation_timeout_ms = 30000
card_hash_salt = "pepper"
overpayment = "reject"

[ledger]
kind = "simulated"

[platform]
address = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
key = "0x0000000000000000000000000000000000000000000000000000000000000001"
starting_balance = "1000"

[[wallets]]
address = "0x2B5AD5c4795c026514f8317c7a215E218DcCD6cF"
key = "0x0000000000000000000000000000000000000000000000000000000000000002"
starting_balance = "50"

[[wallets]]
address = "0x6813Eb9362372EEF6200f3b1dbC3f819671cBA69"
key = "0x0000000000000000000000000000000000000000000000000000000000000003"
starting_balance = "50"

[webhook]
secret = "provider-secret"
"#;

    #[test]
    fn test_config_parsing() {
        let config: FileConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(
            config.settlement.exchange_rate,
            Decimal::from_str("25000").unwrap()
        );
        assert_eq!(config.settlement.required_confirmations, 1);
        assert_eq!(config.ledger.kind, LedgerKind::Simulated);
        assert_eq!(config.wallets.len(), 2);
        assert_eq!(config.webhook.order_prefix, "ORD");
        assert_eq!(config.webhook.labels.len(), 3);
        assert!(!config.is_admin_secret_hashed());
    }

    #[test]
    fn test_hashed_secret_detection() {
        let mut config: FileConfig = toml::from_str(SAMPLE).unwrap();
        config.admin.secret = "$argon2id$v=19$m=19456,t=2,p=1$abc123".to_string();
        assert!(config.is_admin_secret_hashed());
    }
}
