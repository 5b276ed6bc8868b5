/*!
Store hôtes sur fichier JSON

Collection hôtes en tableau JSON sur disque, chargée au démarrage et gardée en
mémoire. Chaque update réécrit tout le fichier via un fichier temporaire renommé
en place, une sauvegarde à la fois.
*/

use super::{HostStore, StoreError};
use crate::models::{Attributes, HostRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use tracing::info;

pub struct JsonFileStore {
    storage_path: PathBuf,
    hosts: Mutex<Vec<HostRecord>>,
    // tenu du changement en mémoire jusqu'au rename du fichier
    save_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Opens (or creates, as an empty collection) the store at `storage_path`.
    pub fn open<P: Into<PathBuf>>(storage_path: P) -> Result<Self, StoreError> {
        let store = Self {
            storage_path: storage_path.into(),
            hosts: Mutex::new(Vec::new()),
            save_lock: tokio::sync::Mutex::new(()),
        };
        store.load_from_disk()?;
        info!(path = ?store.storage_path, hosts = store.hosts.lock().len(), "host store opened");
        Ok(store)
    }

    fn load_from_disk(&self) -> Result<(), StoreError> {
        if !self.storage_path.exists() {
            if let Some(parent) = self.storage_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.storage_path, "[]")?;
        }

        let content = fs::read_to_string(&self.storage_path)?;
        let mut hosts: Vec<HostRecord> = serde_json::from_str(&content)?;
        hosts.sort_by_key(|h| h.host_id);

        *self.hosts.lock() = hosts;
        Ok(())
    }

    async fn save_to_disk(&self) -> Result<(), StoreError> {
        let json = {
            let hosts = self.hosts.lock();
            serde_json::to_string_pretty(&*hosts)?
        };
        let tmp_path = self.storage_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.storage_path).await?;
        Ok(())
    }
}

#[async_trait]
impl HostStore for JsonFileStore {
    async fn find_by_inner_ips(&self, cloud_id: i64, ips: &[String]) -> Result<Vec<HostRecord>, StoreError> {
        let hosts = self.hosts.lock();
        Ok(hosts
            .iter()
            .filter(|h| h.cloud_id == cloud_id && ips.iter().any(|ip| *ip == h.inner_ip))
            .cloned()
            .collect())
    }

    async fn list_page(&self, start: u64, limit: u64) -> Result<Vec<HostRecord>, StoreError> {
        let hosts = self.hosts.lock();
        Ok(hosts
            .iter()
            .skip(start as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn update_host(&self, host_id: i64, changes: &Attributes) -> Result<u64, StoreError> {
        let _save = self.save_lock.lock().await;
        let matched = {
            let mut hosts = self.hosts.lock();
            match hosts.iter_mut().find(|h| h.host_id == host_id) {
                Some(host) => {
                    host.attributes.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
                    1
                }
                None => 0,
            }
        };

        if matched > 0 {
            self.save_to_disk().await?;
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seed(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("hosts.json");
        let docs = json!([
            {"bk_host_id": 3, "bk_cloud_id": 0, "bk_host_innerip": "10.0.0.3", "bk_cpu": 2},
            {"bk_host_id": 1, "bk_cloud_id": 0, "bk_host_innerip": "10.0.0.1"},
            {"bk_host_id": 2, "bk_cloud_id": 1, "bk_host_innerip": "10.0.0.1"}
        ]);
        fs::write(&path, docs.to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_open_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hosts.json");
        let store = JsonFileStore::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.list_page(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_matches_cloud_and_ip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(seed(&dir)).unwrap();

        let found = store.find_by_inner_ips(1, &["10.0.0.1".into(), "10.9.9.9".into()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].host_id, 2);

        assert!(store.find_by_inner_ips(2, &["10.0.0.1".into()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pages_are_ordered_by_host_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(seed(&dir)).unwrap();

        let first: Vec<i64> = store.list_page(0, 2).await.unwrap().iter().map(|h| h.host_id).collect();
        let second: Vec<i64> = store.list_page(2, 2).await.unwrap().iter().map(|h| h.host_id).collect();
        assert_eq!(first, vec![1, 2]);
        assert_eq!(second, vec![3]);
    }

    #[tokio::test]
    async fn test_update_persists_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(&dir);
        let store = JsonFileStore::open(&path).unwrap();

        let mut changes = Attributes::new();
        changes.insert("bk_cpu".into(), json!(4));
        assert_eq!(store.update_host(3, &changes).await.unwrap(), 1);
        assert_eq!(store.update_host(99, &changes).await.unwrap(), 0);

        let reopened = JsonFileStore::open(&path).unwrap();
        let host = reopened.find_by_inner_ips(0, &["10.0.0.3".into()]).await.unwrap().remove(0);
        assert_eq!(host.attributes["bk_cpu"], json!(4));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_updates_all_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.json");
        let docs: Vec<_> = (1..=40)
            .map(|id| json!({"bk_host_id": id, "bk_cloud_id": 0, "bk_host_innerip": format!("10.0.1.{id}")}))
            .collect();
        fs::write(&path, serde_json::to_string(&docs).unwrap()).unwrap();
        let store = std::sync::Arc::new(JsonFileStore::open(&path).unwrap());

        let tasks: Vec<_> = (1..=40i64)
            .map(|id| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut changes = Attributes::new();
                    changes.insert("bk_cpu".into(), json!(id));
                    store.update_host(id, &changes).await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        let hosts = reopened.list_page(0, 100).await.unwrap();
        assert_eq!(hosts.len(), 40);
        for host in hosts {
            assert_eq!(host.attributes["bk_cpu"], json!(host.host_id));
        }
        assert!(!path.with_extension("json.tmp").exists());
    }
}
