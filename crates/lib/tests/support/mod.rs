//! Scripted in-memory protocol client shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use gowa::client::{ClientError, ClientEvent, EventHandler, Jid, PairingEvent, ProtocolClient};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub const PAIRED_JID: &str = "15550100@s.whatsapp.net";

/// Protocol client whose behavior is set up by the test. On connect, any scripted
/// pairing events are pushed onto the open pairing stream in order.
#[derive(Default)]
pub struct ScriptedClient {
    pub connected: AtomicBool,
    pub identity: Mutex<Option<String>>,
    pub pairing_script: Mutex<Vec<PairingEvent>>,
    /// Leave `connected` false after a successful connect.
    pub stay_disconnected: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_send: AtomicBool,
    /// Panic inside `send_message`.
    pub panic_on_send: AtomicBool,
    pub fail_logout: AtomicBool,
    pub fail_pairing_stream: Mutex<Option<ClientError>>,
    /// Simulate another path connecting while the pairing stream is requested.
    pub connect_during_stream_request: AtomicBool,
    pub sent: Mutex<Vec<(Jid, String)>>,
    pub connect_calls: AtomicUsize,
    pub pairing_stream_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pairing_tx: Mutex<Option<mpsc::Sender<PairingEvent>>>,
    handler: Mutex<Option<EventHandler>>,
}

impl ScriptedClient {
    pub fn fresh(script: Vec<PairingEvent>) -> Self {
        let client = Self::default();
        *client.pairing_script.lock().unwrap() = script;
        client
    }

    pub fn paired() -> Self {
        let client = Self::default();
        *client.identity.lock().unwrap() = Some(PAIRED_JID.to_string());
        client
    }

    pub fn online() -> Self {
        let client = Self::paired();
        client.connected.store(true, Ordering::SeqCst);
        client
    }

    /// Push one event onto the open pairing stream.
    pub async fn push_pairing(&self, event: PairingEvent) -> bool {
        let tx = self.pairing_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Deliver an event through the registered handler.
    pub fn emit(&self, event: ClientEvent) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }
}

#[async_trait]
impl ProtocolClient for ScriptedClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        if !self.stay_disconnected.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
        }

        let script = std::mem::take(&mut *self.pairing_script.lock().unwrap());
        let tx = self.pairing_tx.lock().unwrap().clone();
        if let (Some(tx), false) = (tx, script.is_empty()) {
            let identity_on_success = script.contains(&PairingEvent::Success);
            if identity_on_success {
                // Identity is recorded before the success marker is observable.
                *self.identity.lock().unwrap() = Some(PAIRED_JID.to_string());
            }
            tokio::spawn(async move {
                for event in script {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn identity(&self) -> Option<String> {
        self.identity.lock().unwrap().clone()
    }

    async fn pairing_stream(&self) -> Result<mpsc::Receiver<PairingEvent>, ClientError> {
        self.pairing_stream_calls.fetch_add(1, Ordering::SeqCst);
        if self.connect_during_stream_request.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
            return Err(ClientError::AlreadyConnected);
        }
        if let Some(err) = self.fail_pairing_stream.lock().unwrap().clone() {
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(16);
        *self.pairing_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn send_message(&self, to: &Jid, body: &str) -> Result<String, ClientError> {
        if self.panic_on_send.load(Ordering::SeqCst) {
            panic!("scripted send panic");
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ClientError::Rejected("invalid recipient".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.clone(), body.to_string()));
        Ok(format!("MSG-{}", sent.len()))
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(ClientError::Timeout);
        }
        *self.identity.lock().unwrap() = None;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }
}

/// Collect everything published on a result channel until it closes.
pub async fn collect_updates<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Some(update) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("result channel stalled")
    {
        out.push(update);
    }
    out
}

/// Poll `cond` until it holds or 5s pass.
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}
