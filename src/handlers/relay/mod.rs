//! Relay channel handling: the per-call WebSocket coordinator and its
//! message protocol.

pub mod handler;
pub mod messages;

pub use handler::relay_handler;
pub use messages::{InboundEvent, MessageRoute, OutboundEvent, SetupEvent};
