/*!
Cache snapshots enregistreur

Implémente `SnapshotCache` en gardant chaque `SET` (clé, valeur, ttl) pour
les assertions. Peut simuler un cache indisponible.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use symbion_hostsnap::snapcache::{CacheError, SnapshotCache};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheWrite {
    pub key: String,
    pub value: String,
    pub ttl: Duration,
}

#[derive(Default)]
pub struct RecordingSnapshotCache {
    writes: Mutex<Vec<CacheWrite>>,
    failing: AtomicBool,
}

impl RecordingSnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<CacheWrite> {
        self.writes.lock().clone()
    }

    pub fn last_write(&self) -> Option<CacheWrite> {
        self.writes.lock().last().cloned()
    }
}

#[async_trait]
impl SnapshotCache for RecordingSnapshotCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("injected failure".into()));
        }
        self.writes.lock().push(CacheWrite {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        });
        Ok(())
    }
}
