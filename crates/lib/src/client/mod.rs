//! Protocol client seam: the coordinator talks to the multidevice protocol only
//! through [`ProtocolClient`]. The shipped implementation is [`BridgeClient`], which
//! drives an external protocol bridge over WebSocket.

mod bridge;
mod frames;
mod jid;

pub use bridge::BridgeClient;
pub use frames::{BridgeEvent, BridgeFrame, BridgeRequest, BridgeResponse};
pub use jid::{normalize_phone, Jid, DEFAULT_USER_SERVER};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One item of a pairing-challenge stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// A QR payload to show to the user; rotates until scanned.
    Code(String),
    /// Pairing finished; the device now has an identity.
    Success,
    /// The protocol gave up waiting for a scan.
    Timeout,
    Error(String),
}

/// Asynchronous lifecycle or message event from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    PairSuccess { jid: String },
    LoggedOut,
    Disconnected,
    Message {
        id: String,
        from: String,
        body: String,
    },
    Other {
        name: String,
        payload: serde_json::Value,
    },
}

/// Callback invoked by the client on its own task for every [`ClientEvent`].
pub type EventHandler = Arc<dyn Fn(ClientEvent) + Send + Sync>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("already connected")]
    AlreadyConnected,

    #[error("device already has a stored identity")]
    AlreadyPaired,

    #[error("not connected")]
    NotConnected,

    #[error("transport: {0}")]
    Transport(String),

    #[error("rejected by bridge: {0}")]
    Rejected(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,
}

/// Connection owner for one device. Implementations must be safe for concurrent use;
/// the coordinator adds no locking of its own around these calls.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open the underlying connection. Returns once the connection is accepted,
    /// not once pairing completes.
    async fn connect(&self) -> Result<(), ClientError>;

    /// Close the connection. Idempotent.
    async fn disconnect(&self);

    /// Live socket state; may change at any time.
    fn is_connected(&self) -> bool;

    /// Account JID, if the device has been paired.
    fn identity(&self) -> Option<String>;

    /// Request the pairing-challenge stream. Must be called before [`ProtocolClient::connect`].
    async fn pairing_stream(&self) -> Result<mpsc::Receiver<PairingEvent>, ClientError>;

    /// Dispatch one text message; returns the message id.
    async fn send_message(&self, to: &Jid, body: &str) -> Result<String, ClientError>;

    /// Unlink the device. On success the stored identity is gone.
    async fn logout(&self) -> Result<(), ClientError>;

    /// Register the event callback, replacing any previous one.
    fn set_event_handler(&self, handler: EventHandler);
}
