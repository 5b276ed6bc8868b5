/*!
Filtre des résultats négatifs

Mémorise les couples `(ip, zone cloud)` pour lesquels le store n'avait aucun hôte,
afin qu'une machine non enregistrée ne coûte pas une requête store par message.
Chaque entrée expire à `now + ttl ± jitter` (secondes unix): le jitter étale les
expirations d'hôtes tombés ensemble.
*/

use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::FilterConf;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FilterKey {
    ip: String,
    cloud_id: i64,
}

pub struct NegativeResultFilter {
    entries: Mutex<HashMap<FilterKey, i64>>,
    ttl_secs: i64,
    jitter_secs: i64,
}

impl NegativeResultFilter {
    pub fn new(conf: &FilterConf) -> Self {
        let ttl_secs = conf.ttl_secs.max(1) as i64;
        // jitter must stay below the ttl or an entry could expire on insert
        let jitter_secs = (conf.jitter_secs as i64).min(ttl_secs - 1);
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_secs,
            jitter_secs,
        }
    }

    /// Records that the store had no host for `(ip, cloud_id)`.
    pub fn set(&self, ip: &str, cloud_id: i64) {
        self.set_at(ip, cloud_id, unix_now());
    }

    /// True while a live (unexpired) entry exists for `(ip, cloud_id)`.
    pub fn exists(&self, ip: &str, cloud_id: i64) -> bool {
        self.exists_at(ip, cloud_id, unix_now())
    }

    /// Removes every expired entry, returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(unix_now())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweeps on a period equal to the base ttl for the life of the process.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let filter = Arc::clone(self);
        let period = Duration::from_secs(filter.ttl_secs as u64);
        info!(period_secs = filter.ttl_secs, "starting negative filter sweeper");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = filter.sweep();
                if removed > 0 {
                    debug!(removed, remaining = filter.len(), "negative filter swept");
                }
            }
        })
    }

    fn set_at(&self, ip: &str, cloud_id: i64, now: i64) {
        let offset = if self.jitter_secs > 0 {
            rand::thread_rng().gen_range(-self.jitter_secs..=self.jitter_secs)
        } else {
            0
        };
        let expires_at = now + self.ttl_secs + offset;
        let key = FilterKey { ip: ip.to_string(), cloud_id };
        self.entries.lock().insert(key, expires_at);
    }

    fn exists_at(&self, ip: &str, cloud_id: i64, now: i64) -> bool {
        let key = FilterKey { ip: ip.to_string(), cloud_id };
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(&expires_at) if expires_at > now => true,
            Some(_) => {
                entries.remove(&key);
                false
            }
            None => false,
        }
    }

    fn sweep_at(&self, now: i64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    #[cfg(test)]
    fn expiry_of(&self, ip: &str, cloud_id: i64) -> Option<i64> {
        let key = FilterKey { ip: ip.to_string(), cloud_id };
        self.entries.lock().get(&key).copied()
    }
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(ttl_secs: u64, jitter_secs: u64) -> NegativeResultFilter {
        NegativeResultFilter::new(&FilterConf { ttl_secs, jitter_secs })
    }

    #[test]
    fn test_set_then_exists() {
        let f = filter(300, 60);
        assert!(!f.exists("10.0.0.5", 0));
        f.set("10.0.0.5", 0);
        assert!(f.exists("10.0.0.5", 0));
        assert!(!f.exists("10.0.0.5", 1));
        assert!(!f.exists("10.0.0.6", 0));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let f = filter(300, 0);
        f.set_at("10.0.0.5", 0, 1_000);
        assert!(f.exists_at("10.0.0.5", 0, 1_299));
        assert!(!f.exists_at("10.0.0.5", 0, 1_300));
        // expired entries are purged on read
        assert!(f.is_empty());
    }

    #[test]
    fn test_jitter_stays_within_window() {
        let f = filter(300, 60);
        let now = 10_000;
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        for i in 0..2_000 {
            let ip = format!("10.0.{}.{}", i / 250, i % 250);
            f.set_at(&ip, 0, now);
            let expiry = f.expiry_of(&ip, 0).unwrap();
            min = min.min(expiry);
            max = max.max(expiry);
        }
        assert!(min >= now + 240, "min expiry {min}");
        assert!(max <= now + 360, "max expiry {max}");
        // spread, not a single synchronized instant
        assert!(max - min > 60);
    }

    #[test]
    fn test_jitter_is_clamped_below_ttl() {
        let f = filter(10, 60);
        for _ in 0..200 {
            f.set_at("10.0.0.5", 0, 100);
            assert!(f.exists_at("10.0.0.5", 0, 100));
        }
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let f = filter(100, 0);
        f.set_at("10.0.0.1", 0, 0);
        f.set_at("10.0.0.2", 0, 50);
        assert_eq!(f.sweep_at(120), 1);
        assert_eq!(f.len(), 1);
        assert!(f.exists_at("10.0.0.2", 0, 120));
    }

    #[test]
    fn test_set_after_expiry_supersedes() {
        let f = filter(100, 0);
        f.set_at("10.0.0.1", 0, 0);
        assert!(!f.exists_at("10.0.0.1", 0, 200));
        f.set_at("10.0.0.1", 0, 200);
        assert!(f.exists_at("10.0.0.1", 0, 250));
    }
}
