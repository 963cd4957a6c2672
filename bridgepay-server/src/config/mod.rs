//! Configuration loading for bridgepay-server.
//!
//! Reads the TOML file, applies CLI overrides, validates everything the
//! settlement core needs and hashes a plaintext admin secret in place.

pub mod file;

use crate::config::file::{AccountConfig, FileConfig, LedgerConfig, LedgerKind};
use alloy::primitives::Address;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use bridgepay_core::config::{MemoPatterns, SettlementSettings};
use bridgepay_core::rate::ExchangeRate;
use bridgepay_core::wallet::{LocalSigner, PoolAccountConfig, SignerError, WalletPool, WalletPoolError};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("invalid settlement settings: {0}")]
    Settlement(#[from] bridgepay_core::config::ConfigError),

    #[error("invalid wallet pool: {0}")]
    WalletPool(#[from] WalletPoolError),

    #[error("invalid platform account: {0}")]
    Platform(#[source] SignerError),

    #[error("password hashing error: {0}")]
    HashError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Validated configuration.
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub admin: AdminCredential,
    pub exchange_rate: ExchangeRate,
    pub settings: SettlementSettings,
    pub memo_patterns: MemoPatterns,
    pub ledger: LedgerConfig,
    pub platform: LocalSigner,
    pub platform_starting_balance: Decimal,
    pub pool: WalletPool,
    pub webhook_secret: Box<[u8]>,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// A plaintext admin secret is hashed and the file rewritten before the
    /// rest of the configuration is built.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        if !file_config.is_admin_secret_hashed() {
            file_config.admin.secret = hash_secret(&file_config.admin.secret)?;
            self.rewrite_config(&file_config)?;
            tracing::info!("Admin secret hashed and config file updated");
        }

        build_loaded_config(file_config)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn rewrite_config(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)?;

        // write to a temp file, then rename over the original
        let temp_path = self.config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml_string)?;
        std::fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

/// The argon2 hash of the secret that authorises refunds.
#[derive(Debug, Clone)]
pub struct AdminCredential {
    hash: String,
}

impl AdminCredential {
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn from_plaintext(secret: &str) -> Result<Self, ConfigError> {
        hash_secret(secret).map(Self::from_hash)
    }

    /// A malformed stored hash matches nothing.
    pub fn verify(&self, presented: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(presented.as_bytes(), &parsed)
            .is_ok()
    }
}

fn hash_secret(plaintext: &str) -> Result<String, ConfigError> {
    use argon2::{
        PasswordHasher,
        password_hash::{SaltString, rand_core::OsRng},
    };

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ConfigError::HashError(e.to_string()))
}

fn parse_address(field: &str, value: &str) -> Result<Address, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("{field}: invalid address {value}: {e}")))
}

fn pool_account(index: usize, account: &AccountConfig) -> Result<PoolAccountConfig, ConfigError> {
    Ok(PoolAccountConfig {
        address: parse_address(&format!("wallets[{index}].address"), &account.address)?,
        signing_key: account.key.clone(),
        starting_balance: account.starting_balance,
    })
}

pub(crate) fn build_loaded_config(file_config: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let FileConfig {
        server,
        admin,
        settlement,
        ledger,
        platform,
        wallets,
        webhook,
    } = file_config;

    let exchange_rate = ExchangeRate::new(settlement.exchange_rate)
        .map_err(bridgepay_core::config::ConfigError::from)?;

    let settings = SettlementSettings {
        wallet_pool_size: settlement.wallet_pool_size,
        confirmation_timeout: Duration::from_millis(settlement.confirmation_timeout_ms),
        required_confirmations: settlement.required_confirmations,
        store_timeout: Duration::from_millis(settlement.store_timeout_ms),
        card_hash_salt: settlement.card_hash_salt,
        overpayment: settlement.overpayment,
    };
    settings.validate()?;
    if settings.card_hash_salt.is_empty() {
        return Err(ConfigError::ValidationError(
            "settlement.card_hash_salt must not be empty".to_string(),
        ));
    }

    let memo_patterns = MemoPatterns {
        order_prefix: webhook.order_prefix,
        labels: webhook.labels,
        min_numeric_digits: webhook.min_numeric_digits,
    };
    memo_patterns.validate()?;
    if webhook.secret.is_empty() {
        return Err(ConfigError::ValidationError(
            "webhook.secret must not be empty".to_string(),
        ));
    }

    if ledger.kind == LedgerKind::Evm && ledger.endpoint.is_none() {
        return Err(ConfigError::ValidationError(
            "ledger.endpoint is required for the evm ledger".to_string(),
        ));
    }
    if ledger.request_timeout_ms == Some(0) {
        return Err(ConfigError::ValidationError(
            "ledger.request_timeout_ms must be positive".to_string(),
        ));
    }

    let accounts = wallets
        .iter()
        .enumerate()
        .map(|(index, account)| pool_account(index, account))
        .collect::<Result<Vec<_>, _>>()?;
    let pool = WalletPool::from_config(&accounts, settings.wallet_pool_size)?;

    let platform_address = parse_address("platform.address", &platform.address)?;
    if pool.entries().iter().any(|e| e.address == platform_address) {
        return Err(ConfigError::ValidationError(
            "platform account must not be part of the wallet pool".to_string(),
        ));
    }
    let platform_signer =
        LocalSigner::from_hex_for(&platform.key, platform_address).map_err(ConfigError::Platform)?;

    Ok(LoadedConfig {
        listen: server.listen,
        admin: AdminCredential::from_hash(admin.secret),
        exchange_rate,
        settings,
        memo_patterns,
        ledger,
        platform: platform_signer,
        platform_starting_balance: platform.starting_balance,
        pool,
        webhook_secret: webhook.secret.into_bytes().into_boxed_slice(),
    })
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
