//! Shared types for the VaxTrack stock platform
//!
//! Wire-level types used by both the stock server and its clients:
//! the realtime message protocol and the organizational role/room
//! vocabulary.

pub mod message;
pub mod roles;

// Re-exports
pub use message::{AlertKind, BusMessage, EventType, NotificationPayload};
pub use roles::{Role, StockLevel};
