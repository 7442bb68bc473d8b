//! Protocol implementations.

pub mod crc;
pub mod iap;

// Re-export common types
pub use iap::{Channel, DeviceStatus, ProtocolMessage, decode_crc_ack};
