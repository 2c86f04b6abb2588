//! Device record: the persisted identity material of one linked client instance.
//!
//! A fresh record carries an Ed25519 identity key and no JID; the JID is filled in
//! once pairing succeeds and cleared again on logout.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Persisted device record (deviceId, identity keypair, optional JID).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    pub public_key: String,
    pub private_key: String,
    /// Account JID assigned by pairing. None means never paired (or logged out).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jid: Option<String>,
}

impl DeviceRecord {
    /// Generate a new identity keypair. device_id is the first 16 chars of base64(public_key).
    pub fn generate() -> Result<Self, getrandom::Error> {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes)?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&bytes);
        let verifying_key = signing_key.verifying_key();
        let public_key = base64::engine::general_purpose::STANDARD.encode(verifying_key.as_bytes());
        let private_key = base64::engine::general_purpose::STANDARD.encode(signing_key.as_bytes());
        let device_id = public_key.chars().take(16).collect::<String>();
        Ok(Self {
            device_id,
            public_key,
            private_key,
            jid: None,
        })
    }

    pub fn is_paired(&self) -> bool {
        self.jid.is_some()
    }
}
