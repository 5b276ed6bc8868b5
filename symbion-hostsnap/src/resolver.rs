/*!
Résolveur d'hôtes

Index mémoire `cloudid::ip` → enregistrement hôte, reconstruit en entier depuis le
store à intervalle fixe:
- une nouvelle [`Generation`] est construite à part en paginant toute la collection,
  puis basculée sous un write lock tenu seulement pour l'affectation du pointeur
- les lecteurs clonent l'`Arc<Generation>` active sous read lock et gardent une
  génération cohérente même si une bascule a lieu pendant la requête
- sur un miss, le store est interrogé directement et le résultat est réinjecté
  dans la génération active
*/

use crate::config::ResolverConf;
use crate::models::{diff_attributes, Attributes, HostKey, HostRecord};
use crate::store::{HostStore, StoreError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A host record shared between the cache and in-flight reconciliations.
///
/// Mutated in place after a successful store write so the cache reflects the
/// written state until the next refresh replaces it.
#[derive(Debug)]
pub struct CachedHost {
    record: RwLock<HostRecord>,
}

impl CachedHost {
    pub fn new(record: HostRecord) -> Self {
        Self { record: RwLock::new(record) }
    }

    pub fn host_id(&self) -> i64 {
        self.record.read().host_id
    }

    pub fn record(&self) -> HostRecord {
        self.record.read().clone()
    }

    /// Observed attributes that differ from the cached copy.
    pub fn diff(&self, observed: &Attributes) -> Attributes {
        diff_attributes(&self.record.read().attributes, observed)
    }

    pub fn apply(&self, changes: &Attributes) {
        let mut record = self.record.write();
        for (name, value) in changes {
            record.attributes.insert(name.clone(), value.clone());
        }
    }
}

/// One point-in-time index of the host collection.
pub struct Generation {
    hosts: RwLock<HashMap<HostKey, Arc<CachedHost>>>,
    built_at: OffsetDateTime,
}

impl Generation {
    pub fn empty() -> Self {
        Self::from_records(Vec::new())
    }

    pub fn from_records(records: impl IntoIterator<Item = HostRecord>) -> Self {
        let hosts = records
            .into_iter()
            .map(|record| (record.key(), Arc::new(CachedHost::new(record))))
            .collect();
        Self {
            hosts: RwLock::new(hosts),
            built_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn get(&self, key: &HostKey) -> Option<Arc<CachedHost>> {
        self.hosts.read().get(key).cloned()
    }

    /// First candidate IP present in this generation.
    pub fn find(&self, cloud_id: i64, ips: &[String]) -> Option<Arc<CachedHost>> {
        let hosts = self.hosts.read();
        ips.iter().find_map(|ip| hosts.get(&HostKey::new(cloud_id, ip)).cloned())
    }

    fn insert(&self, key: HostKey, host: Arc<CachedHost>) {
        self.hosts.write().insert(key, host);
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn built_at(&self) -> OffsetDateTime {
        self.built_at
    }
}

pub struct HostResolver {
    store: Arc<dyn HostStore>,
    active: RwLock<Arc<Generation>>,
    page_size: u64,
    refresh_interval: Duration,
}

impl HostResolver {
    /// Starts with an empty generation; call [`refresh`](Self::refresh) or
    /// [`spawn_refresh_loop`](Self::spawn_refresh_loop) to populate it.
    pub fn new(store: Arc<dyn HostStore>, conf: &ResolverConf) -> Self {
        Self {
            store,
            active: RwLock::new(Arc::new(Generation::empty())),
            page_size: conf.page_size.max(1),
            refresh_interval: conf.refresh_interval(),
        }
    }

    /// The generation currently serving reads.
    pub fn generation(&self) -> Arc<Generation> {
        Arc::clone(&self.active.read())
    }

    /// Cache-only lookup over the candidate IPs, in order.
    pub fn lookup(&self, cloud_id: i64, ips: &[String]) -> Option<Arc<CachedHost>> {
        self.generation().find(cloud_id, ips)
    }

    /// Cache first, then a single store query for all candidates.
    ///
    /// `Ok(None)` means neither the cache nor the store know the host; the
    /// caller decides whether to record that in the negative filter.
    pub async fn resolve(&self, cloud_id: i64, ips: &[String]) -> Result<Option<Arc<CachedHost>>, StoreError> {
        if let Some(host) = self.lookup(cloud_id, ips) {
            return Ok(Some(host));
        }
        if ips.is_empty() {
            return Ok(None);
        }

        debug!(cloud_id, ?ips, "ips not in cache, querying store");
        let found = self.store.find_by_inner_ips(cloud_id, ips).await.map_err(|e| {
            error!(cloud_id, ?ips, "host lookup failed: {e}");
            e
        })?;

        let Some(record) = found.into_iter().next() else {
            info!(cloud_id, ?ips, "ips not in cache and store");
            return Ok(None);
        };

        let key = record.key();
        let host = Arc::new(CachedHost::new(record));
        self.generation().insert(key, Arc::clone(&host));
        Ok(Some(host))
    }

    /// Pages through the whole collection. A failed page aborts the build.
    pub async fn build_generation(&self) -> Result<Generation, StoreError> {
        let mut records = Vec::new();
        let mut start = 0u64;
        loop {
            let page = self.store.list_page(start, self.page_size).await?;
            let fetched = page.len() as u64;
            records.extend(page);
            if fetched < self.page_size {
                break;
            }
            start += self.page_size;
        }
        Ok(Generation::from_records(records))
    }

    /// Builds a new generation and swaps it in. On store failure the active
    /// generation is kept and `None` is returned.
    pub async fn refresh(&self) -> Option<usize> {
        match self.build_generation().await {
            Ok(generation) => {
                let size = generation.len();
                *self.active.write() = Arc::new(generation);
                info!(hosts = size, "host cache refreshed");
                Some(size)
            }
            Err(e) => {
                error!("host cache refresh failed, keeping previous generation: {e}");
                None
            }
        }
    }

    /// Refreshes immediately, then every refresh interval, for the life of the
    /// process.
    pub fn spawn_refresh_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let resolver = Arc::clone(self);
        info!(interval_secs = resolver.refresh_interval.as_secs(), "starting host cache refresh loop");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(resolver.refresh_interval);
            loop {
                interval.tick().await;
                resolver.refresh().await;
            }
        })
    }
}
