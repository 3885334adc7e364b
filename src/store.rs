//! Durable storage for known HID hosts
//!
//! The host cache is persisted as a small JSON document:
//!
//! ```json
//! { "hosts": [{ "address": "AA:BB:CC:DD:EE:FF", "name": "Laptop", "bond": "bonded" }],
//!   "default": "AA:BB:CC:DD:EE:FF" }
//! ```
//!
//! Stored at `~/.local/share/hidhostd/hosts.json` unless overridden.
//! Writes go through a temp file in the same directory and are renamed
//! into place, so a crash mid-write never leaves a truncated store.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::device::{Device, DeviceAddress};
use crate::error::StoreError;

/// Default data directory name
const STORE_DIR: &str = "hidhostd";

/// Default store file name
const STORE_FILE: &str = "hosts.json";

/// Persisted form of the host cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHosts {
    #[serde(default)]
    pub hosts: Vec<Device>,
    #[serde(default)]
    pub default: Option<DeviceAddress>,
}

/// Backing store for the device cache
pub trait DeviceStore: Send {
    fn load(&self) -> Result<StoredHosts, StoreError>;
    fn save(&self, hosts: &StoredHosts) -> Result<(), StoreError>;
}

// ============================================================================
// JSON File Store
// ============================================================================

/// JSON file backed host store
#[derive(Debug, Clone)]
pub struct JsonDeviceStore {
    path: PathBuf,
}

impl JsonDeviceStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default data location
    pub fn open_default() -> Result<Self, StoreError> {
        Self::default_path()
            .map(Self::new)
            .ok_or(StoreError::NoLocation)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join(STORE_DIR).join(STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceStore for JsonDeviceStore {
    fn load(&self) -> Result<StoredHosts, StoreError> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "Host store not found, starting empty");
            return Ok(StoredHosts::default());
        }

        let contents = fs::read_to_string(&self.path)?;
        let stored: StoredHosts = serde_json::from_str(&contents)?;

        tracing::info!(
            path = %self.path.display(),
            hosts = stored.hosts.len(),
            has_default = stored.default.is_some(),
            "Host store loaded"
        );
        Ok(stored)
    }

    fn save(&self, hosts: &StoredHosts) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let contents = serde_json::to_string_pretty(hosts)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::IoError(e.error))?;

        tracing::debug!(path = %self.path.display(), hosts = hosts.hosts.len(), "Host store saved");
        Ok(())
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Volatile store, shared so callers can inspect what was persisted
#[derive(Debug, Clone, Default)]
pub struct MemoryDeviceStore {
    inner: Arc<Mutex<StoredHosts>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hosts(hosts: StoredHosts) -> Self {
        Self {
            inner: Arc::new(Mutex::new(hosts)),
        }
    }

    /// Last persisted snapshot
    pub fn snapshot(&self) -> StoredHosts {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn load(&self) -> Result<StoredHosts, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, hosts: &StoredHosts) -> Result<(), StoreError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = hosts.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BondState;

    fn laptop() -> Device {
        Device::new(
            DeviceAddress::parse("11:22:33:44:55:66").unwrap(),
            "Laptop",
            BondState::Bonded,
        )
    }

    #[test]
    fn test_json_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDeviceStore::new(dir.path().join("hosts.json"));
        assert_eq!(store.load().unwrap(), StoredHosts::default());
    }

    #[test]
    fn test_json_store_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hosts.json");
        let store = JsonDeviceStore::new(&path);

        let hosts = StoredHosts {
            hosts: vec![laptop()],
            default: Some(laptop().address),
        };
        store.save(&hosts).unwrap();

        assert!(path.exists());
        let reopened = JsonDeviceStore::new(&path);
        assert_eq!(reopened.load().unwrap(), hosts);
    }

    #[test]
    fn test_json_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonDeviceStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::ParseError(_))));
    }

    #[test]
    fn test_json_store_document_format() {
        let json = r#"{
            "hosts": [{"address": "aa:bb:cc:dd:ee:ff", "name": "Desk PC", "bond": "bonded"}],
            "default": "AA:BB:CC:DD:EE:FF"
        }"#;
        let stored: StoredHosts = serde_json::from_str(json).unwrap();
        assert_eq!(stored.hosts[0].address.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(stored.default, Some(stored.hosts[0].address.clone()));
    }

    #[test]
    fn test_memory_store_shares_snapshot() {
        let store = MemoryDeviceStore::new();
        let observer = store.clone();

        store
            .save(&StoredHosts {
                hosts: vec![laptop()],
                default: None,
            })
            .unwrap();

        assert_eq!(observer.snapshot().hosts.len(), 1);
    }
}
