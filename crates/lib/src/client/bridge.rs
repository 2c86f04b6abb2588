//! Bridge client: drives an external multidevice protocol bridge over WebSocket.
//!
//! The bridge owns the handshake, encryption and device-linking cryptography. This
//! client sends `req` frames (connect, send, logout), correlates `res` frames by id,
//! and turns `event` frames into pairing-stream items and [`ClientEvent`]s.

use super::frames::{BridgeEvent, BridgeFrame, BridgeRequest, BridgeResponse};
use super::{ClientError, ClientEvent, EventHandler, Jid, PairingEvent, ProtocolClient};
use crate::device::DeviceRecord;
use crate::store::CredentialStore;
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, Message};

const PAIRING_STREAM_CAPACITY: usize = 8;
const OUTBOUND_CAPACITY: usize = 32;

/// [`ProtocolClient`] backed by a bridge WebSocket.
pub struct BridgeClient {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    request_timeout: Duration,
    store: Arc<CredentialStore>,
    device: RwLock<DeviceRecord>,
    /// Serializes connect and disconnect.
    connect_lock: tokio::sync::Mutex<()>,
    link: Mutex<Option<Link>>,
    pending: Mutex<HashMap<String, oneshot::Sender<BridgeResponse>>>,
    pairing_tx: Mutex<Option<mpsc::Sender<PairingEvent>>>,
    handler: RwLock<Option<EventHandler>>,
}

/// One open socket: outbound queue to the writer task and a liveness flag shared
/// with the reader task.
struct Link {
    outbound: mpsc::Sender<Message>,
    alive: Arc<AtomicBool>,
}

impl BridgeClient {
    pub fn new(
        url: impl Into<String>,
        request_timeout: Duration,
        store: Arc<CredentialStore>,
        device: DeviceRecord,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                request_timeout,
                store,
                device: RwLock::new(device),
                connect_lock: tokio::sync::Mutex::new(()),
                link: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                pairing_tx: Mutex::new(None),
                handler: RwLock::new(None),
            }),
        }
    }

    pub fn device_id(&self) -> String {
        self.inner.device.read().device_id.clone()
    }
}

#[async_trait]
impl ProtocolClient for BridgeClient {
    async fn connect(&self) -> Result<(), ClientError> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.inner.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        let (ws, _) = tokio_tungstenite::connect_async(self.inner.url.as_str())
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let (mut sink, stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });
        {
            let inner = self.inner.clone();
            let alive = alive.clone();
            tokio::spawn(async move {
                inner.read_loop(stream, alive).await;
            });
        }
        *self.inner.link.lock() = Some(Link { outbound, alive });
        log::debug!("bridge socket open: {}", self.inner.url);

        let params = {
            let device = self.inner.device.read();
            json!({
                "device": { "id": device.device_id, "publicKey": device.public_key },
                "jid": device.jid,
            })
        };
        if let Err(e) = self.inner.request("connect", params).await {
            log::warn!("bridge connect handshake failed: {}", e);
            self.inner.close_link();
            return Err(e);
        }
        log::info!("bridge connection accepted");
        Ok(())
    }

    async fn disconnect(&self) {
        let _guard = self.inner.connect_lock.lock().await;
        self.inner.close_link();
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn identity(&self) -> Option<String> {
        self.inner.device.read().jid.clone()
    }

    async fn pairing_stream(&self) -> Result<mpsc::Receiver<PairingEvent>, ClientError> {
        if self.identity().is_some() {
            return Err(ClientError::AlreadyPaired);
        }
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }
        let (tx, rx) = mpsc::channel(PAIRING_STREAM_CAPACITY);
        *self.inner.pairing_tx.lock() = Some(tx);
        Ok(rx)
    }

    async fn send_message(&self, to: &Jid, body: &str) -> Result<String, ClientError> {
        let payload = self
            .inner
            .request("send", json!({ "to": to.to_string(), "body": body }))
            .await?;
        payload
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ClientError::Rejected("send response missing message id".to_string()))
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.inner.request("logout", json!({})).await?;
        self.inner.set_identity(None).await;
        self.disconnect().await;
        Ok(())
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.inner.handler.write() = Some(handler);
    }
}

impl Inner {
    fn is_connected(&self) -> bool {
        self.link
            .lock()
            .as_ref()
            .is_some_and(|l| l.alive.load(Ordering::SeqCst))
    }

    /// Send a request frame and wait for its response payload.
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        let outbound = self
            .link
            .lock()
            .as_ref()
            .filter(|l| l.alive.load(Ordering::SeqCst))
            .map(|l| l.outbound.clone())
            .ok_or(ClientError::NotConnected)?;

        let id = format!("req-{}", uuid::Uuid::new_v4());
        let frame = BridgeFrame::Request(BridgeRequest {
            id: id.clone(),
            method: method.to_string(),
            params,
        });
        let text = serde_json::to_string(&frame).map_err(|e| ClientError::Transport(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        if outbound.send(Message::Text(text)).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(ClientError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(res)) if res.ok => Ok(res.payload.unwrap_or(serde_json::Value::Null)),
            Ok(Ok(res)) => Err(ClientError::Rejected(
                res.error.unwrap_or_else(|| format!("{} failed", method)),
            )),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                log::warn!("bridge request {} timed out", method);
                Err(ClientError::Timeout)
            }
        }
    }

    async fn read_loop<S>(self: Arc<Self>, mut stream: S, alive: Arc<AtomicBool>)
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(Message::Text(t)) => t,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("bridge read error: {}", e);
                    break;
                }
            };
            match serde_json::from_str::<BridgeFrame>(&text) {
                Ok(BridgeFrame::Response(res)) => self.resolve(res),
                Ok(BridgeFrame::Event(ev)) => self.handle_event(ev).await,
                Ok(BridgeFrame::Request(req)) => {
                    log::debug!("ignoring bridge-initiated request {}", req.method)
                }
                Err(e) => log::warn!("unparseable bridge frame: {}", e),
            }
        }
        if alive.swap(false, Ordering::SeqCst) {
            log::info!("bridge socket closed");
            self.teardown();
        }
    }

    fn resolve(&self, res: BridgeResponse) {
        match self.pending.lock().remove(&res.id) {
            Some(tx) => {
                let _ = tx.send(res);
            }
            None => log::debug!("response for unknown request {}", res.id),
        }
    }

    async fn handle_event(&self, ev: BridgeEvent) {
        match ev.event.as_str() {
            "pair.code" => match ev.payload_str("code") {
                Some(code) => self.push_pairing(PairingEvent::Code(code.to_string())),
                None => log::warn!("pair.code event without code"),
            },
            "pair.success" => match ev
                .payload_str("jid")
                .map(str::trim)
                .filter(|j| !j.is_empty())
            {
                Some(jid) => {
                    let jid = jid.to_string();
                    log::info!("pairing succeeded as {}", jid);
                    self.set_identity(Some(jid.clone())).await;
                    self.finish_pairing(PairingEvent::Success);
                    self.emit(ClientEvent::PairSuccess { jid });
                }
                None => {
                    log::warn!("pair.success event without jid");
                    self.finish_pairing(PairingEvent::Error(
                        "pairing succeeded without a jid".to_string(),
                    ));
                }
            },
            "pair.timeout" => self.finish_pairing(PairingEvent::Timeout),
            "pair.error" => {
                let message = ev.payload_str("message").unwrap_or("pairing failed").to_string();
                self.finish_pairing(PairingEvent::Error(message));
            }
            "connected" => self.emit(ClientEvent::Connected),
            "logged_out" => {
                self.set_identity(None).await;
                self.emit(ClientEvent::LoggedOut);
            }
            "message" => self.emit(ClientEvent::Message {
                id: ev.payload_str("id").unwrap_or_default().to_string(),
                from: ev.payload_str("from").unwrap_or_default().to_string(),
                body: ev.payload_str("body").unwrap_or_default().to_string(),
            }),
            other => {
                let name = other.to_string();
                self.emit(ClientEvent::Other {
                    name,
                    payload: ev.payload,
                });
            }
        }
    }

    /// Queue a code without waiting; codes are superseded, so a full stream drops this one.
    fn push_pairing(&self, event: PairingEvent) {
        let mut slot = self.pairing_tx.lock();
        let Some(tx) = slot.as_ref() else {
            log::debug!("pairing event with no stream open, dropped");
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::debug!("pairing stream full, code dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                slot.take();
            }
        }
    }

    /// Close the stream with a final event. Delivery runs on its own task so the reader
    /// never waits on the pairing consumer.
    fn finish_pairing(&self, event: PairingEvent) {
        let tx = self.pairing_tx.lock().take();
        if let Some(tx) = tx {
            tokio::spawn(async move {
                let _ = tx.send(event).await;
            });
        }
    }

    async fn set_identity(&self, jid: Option<String>) {
        let record = {
            let mut device = self.device.write();
            device.jid = jid;
            device.clone()
        };
        if let Err(e) = self.store.save_device(&record).await {
            log::error!("persisting device {} failed: {}", record.device_id, e);
        }
    }

    fn emit(&self, event: ClientEvent) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Drop the current link; the writer task closes the socket once its queue drains.
    fn close_link(&self) {
        let link = self.link.lock().take();
        if let Some(link) = link {
            if link.alive.swap(false, Ordering::SeqCst) {
                log::info!("bridge disconnected");
                self.teardown();
            }
        }
    }

    /// Fail in-flight requests, close the pairing stream, report the disconnect.
    fn teardown(&self) {
        self.pending.lock().clear();
        self.pairing_tx.lock().take();
        self.emit(ClientEvent::Disconnected);
    }
}
