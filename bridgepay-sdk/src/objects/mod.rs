pub mod notification;
pub mod order;
pub mod payment;

pub use notification::{BankTransferNotification, NotificationAck};
pub use order::{OrderResponse, OrderStatus, PaymentStatus};
pub use payment::{CardPaymentRequest, MaskedCardNumber, SettlementResponse, SettlementStatus};
