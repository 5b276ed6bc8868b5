/*!
Moteur de réconciliation

Un message de télémétrie en entrée, au plus une écriture store en sortie:
parse → résolution (cache, filtre négatif, store) → publication du payload brut →
diff contre l'enregistrement en cache → update partiel → patch de la copie en cache.
*/

use crate::config::SnapshotConf;
use crate::filter::NegativeResultFilter;
use crate::models::Attributes;
use crate::resolver::{CachedHost, HostResolver};
use crate::snapcache::SnapshotCache;
use crate::snapshot::{self, ParsedSnapshot};
use crate::store::{HostStore, StoreError};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a message was dropped without touching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Malformed,
    MissingCloudId,
    NoCandidateIp,
    /// Every candidate IP has a live negative entry.
    Suppressed,
    HostNotFound,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::Malformed => "malformed",
            DropReason::MissingCloudId => "missing_cloud_id",
            DropReason::NoCandidateIp => "no_candidate_ip",
            DropReason::Suppressed => "suppressed",
            DropReason::HostNotFound => "host_not_found",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Dropped(DropReason),
    Unchanged { host_id: i64 },
    Updated { host_id: i64, changes: Attributes },
}

enum Resolution {
    Found(Arc<CachedHost>),
    Dropped(DropReason),
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("host store error: {0}")]
    Store(#[from] StoreError),
}

pub struct ReconciliationEngine {
    resolver: Arc<HostResolver>,
    filter: Arc<NegativeResultFilter>,
    store: Arc<dyn HostStore>,
    snap_cache: Arc<dyn SnapshotCache>,
    snapshot_conf: SnapshotConf,
}

impl ReconciliationEngine {
    pub fn new(
        resolver: Arc<HostResolver>,
        filter: Arc<NegativeResultFilter>,
        store: Arc<dyn HostStore>,
        snap_cache: Arc<dyn SnapshotCache>,
        snapshot_conf: SnapshotConf,
    ) -> Self {
        Self { resolver, filter, store, snap_cache, snapshot_conf }
    }

    pub fn resolver(&self) -> &Arc<HostResolver> {
        &self.resolver
    }

    pub fn filter(&self) -> &Arc<NegativeResultFilter> {
        &self.filter
    }

    /// Processes one raw telemetry message.
    ///
    /// Incomplete messages and unknown hosts are `Ok(Outcome::Dropped(_))`;
    /// only store failures during lookup or update are errors.
    pub async fn analyze(&self, raw: &str) -> Result<Outcome, AnalyzeError> {
        let snap = match snapshot::parse(raw) {
            Ok(snap) => snap,
            Err(e) => {
                debug!("dropping unparseable message: {e}");
                return Ok(Outcome::Dropped(DropReason::Malformed));
            }
        };

        let Some(cloud_id) = snap.cloud_id else {
            info!("cloudid missing or not numeric, dropping message");
            return Ok(Outcome::Dropped(DropReason::MissingCloudId));
        };
        if snap.candidate_ips.is_empty() {
            info!(cloud_id, "message carries no usable ip, dropping");
            return Ok(Outcome::Dropped(DropReason::NoCandidateIp));
        }

        let host = match self.resolve(cloud_id, &snap.candidate_ips).await? {
            Resolution::Found(host) => host,
            Resolution::Dropped(reason) => return Ok(Outcome::Dropped(reason)),
        };

        self.publish_snapshot(host.host_id(), &snap).await;
        self.reconcile(&host, &snap).await
    }

    /// Cache hit, or a filter-narrowed store lookup. Misses record negative
    /// entries for every IP that was queried.
    async fn resolve(&self, cloud_id: i64, ips: &[String]) -> Result<Resolution, StoreError> {
        if let Some(host) = self.resolver.lookup(cloud_id, ips) {
            return Ok(Resolution::Found(host));
        }

        let unsuppressed: Vec<String> = ips
            .iter()
            .filter(|ip| !self.filter.exists(ip, cloud_id))
            .cloned()
            .collect();
        if unsuppressed.is_empty() {
            debug!(cloud_id, ?ips, "all candidate ips recently not found, dropping");
            return Ok(Resolution::Dropped(DropReason::Suppressed));
        }

        match self.resolver.resolve(cloud_id, &unsuppressed).await? {
            Some(host) => Ok(Resolution::Found(host)),
            None => {
                for ip in &unsuppressed {
                    self.filter.set(ip, cloud_id);
                }
                Ok(Resolution::Dropped(DropReason::HostNotFound))
            }
        }
    }

    async fn publish_snapshot(&self, host_id: i64, snap: &ParsedSnapshot) {
        let key = format!("{}{}", self.snapshot_conf.key_prefix, host_id);
        if let Err(e) = self.snap_cache.set(&key, &snap.payload, self.snapshot_conf.ttl()).await {
            warn!(host_id, "failed to publish snapshot: {e}");
        }
    }

    async fn reconcile(&self, host: &CachedHost, snap: &ParsedSnapshot) -> Result<Outcome, AnalyzeError> {
        let record = host.record();
        let observed = snap.host_attributes(&record.inner_ip, record.outer_ip());
        let changes = host.diff(&observed);
        if changes.is_empty() {
            debug!(host_id = record.host_id, "no attribute change");
            return Ok(Outcome::Unchanged { host_id: record.host_id });
        }

        let matched = self.store.update_host(record.host_id, &changes).await?;
        if matched == 0 {
            warn!(host_id = record.host_id, "update matched no host, record gone from store");
            return Ok(Outcome::Dropped(DropReason::HostNotFound));
        }

        host.apply(&changes);
        info!(host_id = record.host_id, changed = ?changes.keys().collect::<Vec<_>>(), "host attributes updated");
        Ok(Outcome::Updated { host_id: record.host_id, changes })
    }
}
