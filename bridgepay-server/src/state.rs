//! Application state shared across all request handlers.

use crate::config::AdminCredential;
use bridgepay_core::service::PaymentService;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub service: PaymentService,
    /// Admin credential (can be reloaded via SIGHUP).
    pub admin: Arc<RwLock<AdminCredential>>,
    /// Key for bank-transfer notification signatures (can be reloaded via SIGHUP).
    pub webhook_secret: Arc<RwLock<Box<[u8]>>>,
}

impl AppState {
    pub fn new(service: PaymentService, admin: AdminCredential, webhook_secret: Box<[u8]>) -> Self {
        Self {
            service,
            admin: Arc::new(RwLock::new(admin)),
            webhook_secret: Arc::new(RwLock::new(webhook_secret)),
        }
    }
}
