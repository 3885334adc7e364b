//! Known-hosts cache with a single default host
//!
//! Invariant: the default address, when set, is always a key of the
//! known-hosts map. `promote_to_default` caches the device itself, and
//! removing a host clears the default if it pointed there.
//!
//! Every mutation is written through to the `DeviceStore`. Store failures
//! are logged and do not roll back the in-memory state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::{Device, DeviceAddress};
use crate::store::{DeviceStore, StoredHosts};

/// Cache shared between the controller and the state machine
///
/// The mutex is the critical section for the monitor-check / cache /
/// promote sequence.
pub type SharedDeviceCache = Arc<Mutex<DeviceCache>>;

/// Wrap a cache for sharing
pub fn new_shared_cache(cache: DeviceCache) -> SharedDeviceCache {
    Arc::new(Mutex::new(cache))
}

/// Lock the shared cache, recovering from a poisoned lock
pub fn lock_cache(cache: &SharedDeviceCache) -> MutexGuard<'_, DeviceCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct DeviceCache {
    hosts: HashMap<DeviceAddress, Device>,
    default: Option<DeviceAddress>,
    store: Box<dyn DeviceStore>,
}

impl DeviceCache {
    /// Load the cache from its backing store
    ///
    /// An unreadable store starts the cache empty. A stored default that is
    /// not among the stored hosts is dropped.
    pub fn open(store: Box<dyn DeviceStore>) -> Self {
        let stored = match store.load() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load host store, starting empty");
                StoredHosts::default()
            }
        };

        let hosts: HashMap<DeviceAddress, Device> = stored
            .hosts
            .into_iter()
            .map(|device| (device.address.clone(), device))
            .collect();

        let default = match stored.default {
            Some(address) if hosts.contains_key(&address) => Some(address),
            Some(address) => {
                tracing::warn!(address = %address, "Stored default host is not a known host, dropping it");
                None
            }
            None => None,
        };

        Self {
            hosts,
            default,
            store,
        }
    }

    pub fn get_default(&self) -> Option<Device> {
        self.default
            .as_ref()
            .and_then(|address| self.hosts.get(address))
            .cloned()
    }

    pub fn is_known_host(&self, address: &DeviceAddress) -> bool {
        self.hosts.contains_key(address)
    }

    pub fn is_default(&self, address: &DeviceAddress) -> bool {
        self.default.as_ref() == Some(address)
    }

    /// Add or refresh a known host
    pub fn cache_host(&mut self, device: Device) {
        tracing::debug!(address = %device.address, name = %device.name, "Caching HID host");
        self.hosts.insert(device.address.clone(), device);
        self.persist();
    }

    /// Make `device` the default host, caching it first
    pub fn promote_to_default(&mut self, device: Device) {
        let address = device.address.clone();
        self.hosts.insert(address.clone(), device);
        if let Some(previous) = self.default.replace(address.clone()) {
            if previous != address {
                tracing::info!(previous = %previous, address = %address, "Default HID host replaced");
            }
        } else {
            tracing::info!(address = %address, "Default HID host set");
        }
        self.persist();
    }

    /// Promote an already known host by address
    ///
    /// Returns `false` if the address is not a known host.
    pub fn promote_known(&mut self, address: &DeviceAddress) -> bool {
        match self.hosts.get(address).cloned() {
            Some(device) => {
                self.promote_to_default(device);
                true
            }
            None => false,
        }
    }

    /// Remove a known host, clearing the default if it was that host
    pub fn forget_host(&mut self, address: &DeviceAddress) -> bool {
        if self.hosts.remove(address).is_none() {
            return false;
        }
        if self.is_default(address) {
            tracing::info!(address = %address, "Default HID host forgotten");
            self.default = None;
        }
        self.persist();
        true
    }

    /// Snapshot of the known hosts, sorted by name then address
    pub fn list_known_hosts(&self) -> Vec<Device> {
        let mut hosts: Vec<Device> = self.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.address.cmp(&b.address)));
        hosts
    }

    /// Reconcile with the platform's bonded-device list
    ///
    /// Known hosts that are still bonded are refreshed from the new
    /// observation; the rest are dropped. Returns `true` if anything changed.
    pub fn sync_with_paired(&mut self, paired: &[Device]) -> bool {
        let observed: HashMap<&DeviceAddress, &Device> = paired
            .iter()
            .filter(|device| device.is_bonded())
            .map(|device| (&device.address, device))
            .collect();

        let mut changed = false;
        self.hosts.retain(|address, known| match observed.get(address) {
            Some(seen) => {
                if *known != **seen {
                    *known = (*seen).clone();
                    changed = true;
                }
                true
            }
            None => {
                tracing::info!(address = %address, "HID host no longer bonded, dropping");
                changed = true;
                false
            }
        });

        if let Some(address) = &self.default {
            if !self.hosts.contains_key(address) {
                self.default = None;
            }
        }

        if changed {
            self.persist();
        }
        changed
    }

    fn persist(&self) {
        let stored = StoredHosts {
            hosts: self.list_known_hosts(),
            default: self.default.clone(),
        };
        if let Err(e) = self.store.save(&stored) {
            tracing::warn!(error = %e, "Failed to persist host store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BondState;
    use crate::store::MemoryDeviceStore;

    fn device(address: &str, name: &str) -> Device {
        Device::new(DeviceAddress::parse(address).unwrap(), name, BondState::Bonded)
    }

    fn empty_cache() -> (DeviceCache, MemoryDeviceStore) {
        let store = MemoryDeviceStore::new();
        (DeviceCache::open(Box::new(store.clone())), store)
    }

    #[test]
    fn test_empty_cache() {
        let (cache, _) = empty_cache();
        assert!(cache.get_default().is_none());
        assert!(cache.list_known_hosts().is_empty());
    }

    #[test]
    fn test_promote_implies_known() {
        let (mut cache, _) = empty_cache();
        let a = device("0A:00:00:00:00:01", "A");

        cache.promote_to_default(a.clone());

        assert!(cache.is_known_host(&a.address));
        assert!(cache.is_default(&a.address));
        assert_eq!(cache.get_default(), Some(a));
    }

    #[test]
    fn test_promote_replaces_default() {
        let (mut cache, _) = empty_cache();
        let a = device("0A:00:00:00:00:01", "A");
        let b = device("0B:00:00:00:00:02", "B");

        cache.promote_to_default(a.clone());
        cache.promote_to_default(b.clone());

        assert!(!cache.is_default(&a.address));
        assert!(cache.is_default(&b.address));
        assert!(cache.is_known_host(&a.address));
    }

    #[test]
    fn test_cache_host_does_not_promote() {
        let (mut cache, _) = empty_cache();
        let a = device("0A:00:00:00:00:01", "A");

        cache.cache_host(a.clone());

        assert!(cache.is_known_host(&a.address));
        assert!(cache.get_default().is_none());
    }

    #[test]
    fn test_mutations_write_through() {
        let (mut cache, store) = empty_cache();
        let a = device("0A:00:00:00:00:01", "A");

        cache.promote_to_default(a.clone());

        let stored = store.snapshot();
        assert_eq!(stored.hosts, vec![a.clone()]);
        assert_eq!(stored.default, Some(a.address));
    }

    #[test]
    fn test_open_drops_dangling_default() {
        let store = MemoryDeviceStore::with_hosts(StoredHosts {
            hosts: vec![device("0A:00:00:00:00:01", "A")],
            default: Some(DeviceAddress::parse("0F:00:00:00:00:0F").unwrap()),
        });
        let cache = DeviceCache::open(Box::new(store));
        assert!(cache.get_default().is_none());
        assert_eq!(cache.list_known_hosts().len(), 1);
    }

    #[test]
    fn test_forget_default_clears_it() {
        let (mut cache, _) = empty_cache();
        let a = device("0A:00:00:00:00:01", "A");
        cache.promote_to_default(a.clone());

        assert!(cache.forget_host(&a.address));
        assert!(!cache.is_known_host(&a.address));
        assert!(cache.get_default().is_none());
        assert!(!cache.forget_host(&a.address));
    }

    #[test]
    fn test_promote_known_rejects_unknown() {
        let (mut cache, _) = empty_cache();
        let a = device("0A:00:00:00:00:01", "A");
        assert!(!cache.promote_known(&a.address));

        cache.cache_host(a.clone());
        assert!(cache.promote_known(&a.address));
        assert!(cache.is_default(&a.address));
    }

    #[test]
    fn test_list_sorted_by_name() {
        let (mut cache, _) = empty_cache();
        cache.cache_host(device("0C:00:00:00:00:03", "Zed"));
        cache.cache_host(device("0A:00:00:00:00:01", "Alpha"));

        let names: Vec<String> = cache.list_known_hosts().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["Alpha", "Zed"]);
    }

    #[test]
    fn test_sync_with_paired_refreshes_and_prunes() {
        let (mut cache, _) = empty_cache();
        let a = device("0A:00:00:00:00:01", "A");
        let b = device("0B:00:00:00:00:02", "B");
        cache.cache_host(a.clone());
        cache.promote_to_default(b.clone());

        let renamed_a = device("0A:00:00:00:00:01", "A (renamed)");
        assert!(cache.sync_with_paired(&[renamed_a.clone()]));

        assert_eq!(cache.list_known_hosts(), vec![renamed_a]);
        assert!(!cache.is_known_host(&b.address));
        assert!(cache.get_default().is_none());
        assert!(!cache.sync_with_paired(&[device("0A:00:00:00:00:01", "A (renamed)")]));
    }

    #[test]
    fn test_sync_ignores_unbonded_observations() {
        let (mut cache, _) = empty_cache();
        let a = device("0A:00:00:00:00:01", "A");
        cache.promote_to_default(a.clone());

        let unbonded = Device::new(a.address.clone(), "A", BondState::Unbonded);
        cache.sync_with_paired(&[unbonded]);

        assert!(!cache.is_known_host(&a.address));
        assert!(cache.get_default().is_none());
    }
}
