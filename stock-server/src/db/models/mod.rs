//! Database Models

pub mod notification;
pub mod stock_lot;
pub mod transfer;

// Re-exports
pub use notification::Notification;
pub use stock_lot::{LotIdentity, StockConsume, StockCreate, StockLot, StockUpdate};
pub use transfer::{TransferInitiate, TransferRecord, TransferRespond, TransferStatus};
