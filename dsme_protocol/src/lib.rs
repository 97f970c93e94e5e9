//! dsme_protocol — message types and bit-exact wire framing for the dsmed
//! local IPC protocol (§3, §6 of the device-state-management specification).
//!
//! # Module Structure
//!
//! - [`types`] - registered type identifiers, device state / thermal enums
//! - [`message`] - the [`message::Message`] sum type and its (de)serialization
//! - [`wire`] - header parsing and full-frame encode/decode
//! - [`endpoint`] - sender identity ([`endpoint::Endpoint`], [`endpoint::Recipient`])

pub mod endpoint;
pub mod message;
pub mod types;
pub mod wire;

pub use endpoint::{ConnectionId, Endpoint, ModuleId, PeerCredentials, Recipient};
pub use message::Message;
pub use types::{type_id, DeviceState, Runlevel, ThermalStatus, TypeId};
