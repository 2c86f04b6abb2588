//! Session coordinator: owns the protocol client and exposes connect, status, send,
//! logout and close to concurrent callers.
//!
//! Connection state is never cached here; every query goes to the client. Pairing is
//! the one asynchronous flow: [`GatewaySession::connect`] starts it and returns, and a
//! relay task forwards pairing codes to the caller's channel in arrival order, ending
//! with [`PairingUpdate::Paired`].

use crate::client::{
    BridgeClient, ClientEvent, EventHandler, Jid, PairingEvent, ProtocolClient,
};
use crate::config::Config;
use crate::error::GatewayError;
use crate::store::{self, CredentialStore, STORE_FILE_NAME};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Value published on a connect result channel.
///
/// A channel that closes without any value means no pairing was needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingUpdate {
    /// Current QR payload; superseded by the next one.
    Code(String),
    /// Pairing completed. Always the last value, published at most once.
    Paired,
}

/// The single stateful entity of the gateway.
pub struct GatewaySession {
    client: Arc<dyn ProtocolClient>,
    events: Arc<EventBuffer>,
    pairing: Arc<AtomicBool>,
    pairing_timeout: Duration,
    closed: AtomicBool,
}

impl GatewaySession {
    /// Ensure the session directory, open the credential store, load the first device
    /// (or create one) and build a bridge client for it.
    pub async fn open(config: &Config) -> Result<Self, GatewayError> {
        store::create_private_dir(&config.session.path)
            .await
            .map_err(GatewayError::Storage)?;
        let store = CredentialStore::open(config.session.path.join(STORE_FILE_NAME))
            .await
            .map_err(GatewayError::Storage)?;
        let store = Arc::new(store);
        let device = match store.first_device().await {
            Some(device) => device,
            None => store.create_device().await.map_err(GatewayError::Device)?,
        };
        log::info!(
            "using device {} ({})",
            device.device_id,
            if device.is_paired() { "paired" } else { "unpaired" }
        );
        let client = BridgeClient::new(
            config.bridge.url.clone(),
            config.bridge.request_timeout(),
            store,
            device,
        );
        Ok(Self::with_client(
            Arc::new(client),
            config.session.event_buffer_capacity,
            config.session.pairing_timeout(),
        ))
    }

    /// Build a session around an existing client and register the event callback.
    pub fn with_client(
        client: Arc<dyn ProtocolClient>,
        event_capacity: usize,
        pairing_timeout: Duration,
    ) -> Self {
        let events = Arc::new(EventBuffer::new(event_capacity));
        let sink = events.clone();
        let handler: EventHandler = Arc::new(move |event| {
            sink.push(event);
        });
        client.set_event_handler(handler);
        Self {
            client,
            events,
            pairing: Arc::new(AtomicBool::new(false)),
            pairing_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Connect the client, pairing first if the device has no identity.
    ///
    /// Returns once the connection attempt is accepted. Pairing codes arrive on
    /// `results`; when no pairing is needed `results` is dropped without a value.
    pub async fn connect(&self, results: mpsc::Sender<PairingUpdate>) -> Result<(), GatewayError> {
        if self.client.is_connected() {
            log::debug!("connect: already connected, no pairing needed");
            return Ok(());
        }

        if self.client.identity().is_some() {
            self.client.connect().await.map_err(GatewayError::Connect)?;
            log::info!("reconnected with stored identity");
            return Ok(());
        }

        let guard = PairingGuard::acquire(&self.pairing).ok_or(GatewayError::PairingInProgress)?;
        let stream = match self.client.pairing_stream().await {
            Ok(stream) => stream,
            Err(e) if self.client.is_connected() => {
                log::debug!("pairing stream refused ({}) but client is connected", e);
                return Ok(());
            }
            Err(e) => return Err(GatewayError::Connect(e)),
        };
        self.client.connect().await.map_err(GatewayError::Connect)?;
        log::info!("pairing started");

        tokio::spawn(relay_pairing(stream, results, guard, self.pairing_timeout));
        Ok(())
    }

    /// Live connection state from the client.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Account JID, or empty string if never paired.
    pub fn identity(&self) -> String {
        self.client.identity().unwrap_or_default()
    }

    /// True while a pairing relay is running.
    pub fn is_pairing(&self) -> bool {
        self.pairing.load(Ordering::SeqCst)
    }

    /// Send a text message to a phone number; returns the message id.
    pub async fn send_message(&self, phone: &str, body: &str) -> Result<String, GatewayError> {
        if !self.client.is_connected() {
            return Err(GatewayError::NotConnected);
        }
        let to = Jid::from_phone(phone);
        let id = self
            .client
            .send_message(&to, body)
            .await
            .map_err(GatewayError::Send)?;
        log::info!("sent message {} to {}", id, to);
        Ok(id)
    }

    /// Unlink the device. The client invalidates the stored identity.
    pub async fn logout(&self) -> Result<(), GatewayError> {
        if !self.client.is_connected() {
            return Err(GatewayError::NotConnected);
        }
        self.client.logout().await.map_err(GatewayError::Logout)?;
        log::info!("logged out");
        Ok(())
    }

    /// Disconnect the client. Only the first call has an effect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.client.disconnect().await;
        log::info!("gateway session closed");
    }

    /// Buffered client events.
    pub fn events(&self) -> &EventBuffer {
        &self.events
    }
}

/// Forward pairing events to the caller until pairing ends, the stream closes, the
/// caller goes away, or `deadline` passes.
async fn relay_pairing(
    mut stream: mpsc::Receiver<PairingEvent>,
    results: mpsc::Sender<PairingUpdate>,
    _guard: PairingGuard,
    deadline: Duration,
) {
    let relay = async {
        while let Some(event) = stream.recv().await {
            match event {
                PairingEvent::Code(code) => {
                    if results.send(PairingUpdate::Code(code)).await.is_err() {
                        log::debug!("pairing relay: result channel dropped");
                        return;
                    }
                }
                PairingEvent::Success => {
                    let _ = results.send(PairingUpdate::Paired).await;
                    return;
                }
                PairingEvent::Timeout => {
                    log::warn!("pairing timed out waiting for scan");
                    return;
                }
                PairingEvent::Error(e) => {
                    log::warn!("pairing failed: {}", e);
                    return;
                }
            }
        }
        log::debug!("pairing relay: stream closed");
    };
    if tokio::time::timeout(deadline, relay).await.is_err() {
        log::warn!("pairing relay stopped after {:?}", deadline);
    }
}

/// Holds the single-flight pairing flag; released on drop.
struct PairingGuard(Arc<AtomicBool>);

impl PairingGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for PairingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Bounded FIFO of client events. Insertion never blocks; a full buffer drops the
/// incoming event and keeps what it already holds.
pub struct EventBuffer {
    tx: mpsc::Sender<ClientEvent>,
    rx: Mutex<mpsc::Receiver<ClientEvent>>,
    dropped: AtomicU64,
}

impl EventBuffer {
    /// Capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            dropped: AtomicU64::new(0),
        }
    }

    /// Try to enqueue; returns false if the event was dropped.
    pub fn push(&self, event: ClientEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("event buffer full, dropped {:?} ({} total)", event, total);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Events currently buffered.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Remove and return everything buffered, oldest first.
    pub fn drain(&self) -> Vec<ClientEvent> {
        let mut rx = self.rx.lock();
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }
}
