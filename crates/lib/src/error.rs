//! Error types for the session coordinator and its collaborators.

use crate::client::ClientError;
use crate::store::StoreError;

/// Failures reported by [`crate::session::GatewaySession`] operations.
///
/// Every variant is terminal to the call that produced it; nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Session directory or credential store unavailable.
    #[error("failed to open session storage: {0}")]
    Storage(#[source] StoreError),

    /// No usable device record could be loaded or created.
    #[error("failed to get device: {0}")]
    Device(#[source] StoreError),

    /// Pairing-stream request or connection attempt failed.
    #[error("failed to connect: {0}")]
    Connect(#[source] ClientError),

    /// Another pairing relay is still running.
    #[error("pairing already in progress")]
    PairingInProgress,

    #[error("client not connected")]
    NotConnected,

    #[error("failed to send message: {0}")]
    Send(#[source] ClientError),

    #[error("failed to logout: {0}")]
    Logout(#[source] ClientError),
}
