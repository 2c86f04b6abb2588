//! Credential store: persisted device records keyed by device id.
//!
//! Backed by a single JSON document (`<session path>/session.json`). The gateway reads
//! the first device at startup; the bridge client writes back the JID after pairing
//! and clears it on logout.

use crate::device::DeviceRecord;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// File name of the credential document inside the session directory.
pub const STORE_FILE_NAME: &str = "session.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: unreadable credential document: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("generating identity key: {0}")]
    KeyGen(getrandom::Error),
}

/// In-memory view of the device records, written through to disk on every change.
pub struct CredentialStore {
    path: PathBuf,
    devices: RwLock<Vec<DeviceRecord>>,
}

impl CredentialStore {
    /// Open the store at `path`, creating the parent directory. A missing file starts empty.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent).await?;
        }
        let devices = match tokio::fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => Vec::new(),
            Ok(s) => serde_json::from_str(&s).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        log::debug!("credential store {} opened with {} device(s)", path.display(), devices.len());
        Ok(Self {
            path,
            devices: RwLock::new(devices),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First stored device, if any.
    pub async fn first_device(&self) -> Option<DeviceRecord> {
        self.devices.read().await.first().cloned()
    }

    /// Generate a fresh unpaired device record and persist it.
    pub async fn create_device(&self) -> Result<DeviceRecord, StoreError> {
        let record = DeviceRecord::generate().map_err(StoreError::KeyGen)?;
        self.devices.write().await.push(record.clone());
        self.save().await?;
        log::info!("created device record {}", record.device_id);
        Ok(record)
    }

    /// Add or replace the record with the same device id and persist.
    pub async fn save_device(&self, record: &DeviceRecord) -> Result<(), StoreError> {
        {
            let mut devices = self.devices.write().await;
            match devices.iter_mut().find(|d| d.device_id == record.device_id) {
                Some(existing) => *existing = record.clone(),
                None => devices.push(record.clone()),
            }
        }
        self.save().await
    }

    async fn save(&self) -> Result<(), StoreError> {
        let devices = self.devices.read().await;
        let json = serde_json::to_string_pretty(&*devices).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Create the session directory (0700 on unix) if it does not exist.
pub async fn create_private_dir(dir: &Path) -> Result<(), StoreError> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await.map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })
}
