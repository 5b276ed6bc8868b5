/*!
Store hôtes en mémoire

Implémente `HostStore` sans persistance. Compte chaque appel et enregistre
chaque update pour les assertions; les pannes s'injectent par opération.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use symbion_hostsnap::models::{Attributes, HostRecord};
use symbion_hostsnap::store::{HostStore, StoreError};

#[derive(Default)]
pub struct MemoryHostStore {
    hosts: Mutex<Vec<HostRecord>>,
    updates: Mutex<Vec<(i64, Attributes)>>,
    find_calls: AtomicUsize,
    list_calls: AtomicUsize,
    fail_find: AtomicBool,
    fail_list: AtomicBool,
    fail_update: AtomicBool,
    /// Page start from which `list_page` fails, when `fail_list` is set.
    fail_list_from: AtomicUsize,
}

impl MemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hosts(hosts: impl IntoIterator<Item = HostRecord>) -> Self {
        let store = Self::new();
        for host in hosts {
            store.insert(host);
        }
        store
    }

    /// Inserts or replaces (by host id), keeping host id order.
    pub fn insert(&self, host: HostRecord) {
        let mut hosts = self.hosts.lock();
        hosts.retain(|h| h.host_id != host.host_id);
        hosts.push(host);
        hosts.sort_by_key(|h| h.host_id);
    }

    /// Changes a host behind the resolver's back, without counting as an update.
    pub fn set_attribute(&self, host_id: i64, name: &str, value: serde_json::Value) {
        if let Some(host) = self.hosts.lock().iter_mut().find(|h| h.host_id == host_id) {
            host.attributes.insert(name.to_string(), value);
        }
    }

    pub fn remove(&self, host_id: i64) {
        self.hosts.lock().retain(|h| h.host_id != host_id);
    }

    pub fn get(&self, host_id: i64) -> Option<HostRecord> {
        self.hosts.lock().iter().find(|h| h.host_id == host_id).cloned()
    }

    pub fn updates(&self) -> Vec<(i64, Attributes)> {
        self.updates.lock().clone()
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fail_find(&self, fail: bool) {
        self.fail_find.store(fail, Ordering::SeqCst);
    }

    pub fn fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    /// Makes every page starting at or after `from` fail.
    pub fn fail_list_from(&self, from: Option<usize>) {
        self.fail_list.store(from.is_some(), Ordering::SeqCst);
        self.fail_list_from.store(from.unwrap_or(0), Ordering::SeqCst);
    }
}

fn unavailable(op: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {op} failure"))
}

#[async_trait]
impl HostStore for MemoryHostStore {
    async fn find_by_inner_ips(&self, cloud_id: i64, ips: &[String]) -> Result<Vec<HostRecord>, StoreError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(unavailable("find"));
        }
        Ok(self
            .hosts
            .lock()
            .iter()
            .filter(|h| h.cloud_id == cloud_id && ips.contains(&h.inner_ip))
            .cloned()
            .collect())
    }

    async fn list_page(&self, start: u64, limit: u64) -> Result<Vec<HostRecord>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) && start as usize >= self.fail_list_from.load(Ordering::SeqCst) {
            return Err(unavailable("list"));
        }
        Ok(self
            .hosts
            .lock()
            .iter()
            .skip(start as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn update_host(&self, host_id: i64, changes: &Attributes) -> Result<u64, StoreError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(unavailable("update"));
        }
        let mut hosts = self.hosts.lock();
        let Some(host) = hosts.iter_mut().find(|h| h.host_id == host_id) else {
            return Ok(0);
        };
        host.attributes.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.updates.lock().push((host_id, changes.clone()));
        Ok(1)
    }
}
