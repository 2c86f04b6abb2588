//! GoWA core library: a WhatsApp multidevice gateway that exposes pairing,
//! connection status, outbound messages and logout over a small HTTP API.

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway;
pub mod session;
pub mod store;

pub use error::GatewayError;
pub use session::{EventBuffer, GatewaySession, PairingUpdate};
