/*!
Test Harness pour HostSnap

Câble un `ReconciliationEngine` complet sur les fakes:
- `MemoryHostStore` comme store hôtes
- `RecordingSnapshotCache` comme cache snapshots
- résolveur et filtre négatif réels, configurables
*/

use crate::fake_store::MemoryHostStore;
use crate::snap_cache::RecordingSnapshotCache;
use std::sync::Arc;
use symbion_hostsnap::config::{FilterConf, ResolverConf, SnapshotConf};
use symbion_hostsnap::engine::{AnalyzeError, Outcome, ReconciliationEngine};
use symbion_hostsnap::filter::NegativeResultFilter;
use symbion_hostsnap::models::HostRecord;
use symbion_hostsnap::resolver::HostResolver;

pub struct TestHarness {
    pub store: Arc<MemoryHostStore>,
    pub cache: Arc<RecordingSnapshotCache>,
    pub resolver: Arc<HostResolver>,
    pub filter: Arc<NegativeResultFilter>,
    pub engine: Arc<ReconciliationEngine>,
    pub snapshot_conf: SnapshotConf,
}

impl TestHarness {
    pub fn new(hosts: impl IntoIterator<Item = HostRecord>) -> Self {
        Self::with_confs(hosts, ResolverConf::default(), FilterConf::default())
    }

    pub fn with_confs(
        hosts: impl IntoIterator<Item = HostRecord>,
        resolver_conf: ResolverConf,
        filter_conf: FilterConf,
    ) -> Self {
        init_tracing();

        let store = Arc::new(MemoryHostStore::with_hosts(hosts));
        let cache = Arc::new(RecordingSnapshotCache::new());
        let snapshot_conf = SnapshotConf::default();
        let resolver = Arc::new(HostResolver::new(store.clone(), &resolver_conf));
        let filter = Arc::new(NegativeResultFilter::new(&filter_conf));
        let engine = Arc::new(ReconciliationEngine::new(
            resolver.clone(),
            filter.clone(),
            store.clone(),
            cache.clone(),
            snapshot_conf.clone(),
        ));

        Self { store, cache, resolver, filter, engine, snapshot_conf }
    }

    /// Same as [`new`](Self::new) with the first generation already built.
    pub async fn warmed(hosts: impl IntoIterator<Item = HostRecord>) -> Self {
        let harness = Self::new(hosts);
        harness.resolver.refresh().await;
        harness
    }

    pub async fn analyze(&self, raw: &str) -> Result<Outcome, AnalyzeError> {
        self.engine.analyze(raw).await
    }

    /// Cached copy of a host from the active generation.
    pub fn cached(&self, cloud_id: i64, ip: &str) -> Option<HostRecord> {
        self.resolver.lookup(cloud_id, &[ip.to_string()]).map(|h| h.record())
    }

    pub fn snapshot_key(&self, host_id: i64) -> String {
        format!("{}{}", self.snapshot_conf.key_prefix, host_id)
    }
}

/// Logs go to the test writer; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("symbion_hostsnap=debug")
        .try_init();
}
