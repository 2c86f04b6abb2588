//! Gateway: HTTP facade over the session coordinator.
//!
//! Routes: GET /health, GET /qr, GET /status, POST /send, POST /logout.

mod qr;
mod server;

pub use qr::{encode_png_base64, QR_IMAGE_SIZE};
pub use server::{router, run_gateway, GatewayState};
