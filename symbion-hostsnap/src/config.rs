/*!
Configuration HostSnap

Fichier YAML (`SYMBION_HOSTSNAP_CONFIG`, défaut `hostsnap.yaml`), chaque section
avec ses valeurs par défaut. Fichier absent ou invalide: défauts + warning.
*/

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostsnapConfig {
    pub mqtt: MqttConf,
    pub http: HttpConf,
    pub store: StoreConf,
    pub resolver: ResolverConf,
    pub filter: FilterConf,
    pub snapshot: SnapshotConf,
    pub ingest: IngestConf,
    pub health: HealthConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub health_topic: String,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConf {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ResolverConf {
    pub refresh_interval_secs: u64,
    pub page_size: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FilterConf {
    pub ttl_secs: u64,
    /// Expiries are spread over `ttl ± jitter`; clamped below the ttl.
    pub jitter_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SnapshotConf {
    pub key_prefix: String,
    pub ttl_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConf {
    pub workers: usize,
    pub queue_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConf {
    pub publish_interval_secs: u64,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            topic: "symbion/hosts/snapshot@v1".into(),
            health_topic: "symbion/hostsnap/health@v1".into(),
            keep_alive_secs: 15,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8081".into() }
    }
}

impl Default for StoreConf {
    fn default() -> Self {
        Self { path: "./data/hosts.json".into() }
    }
}

impl Default for ResolverConf {
    fn default() -> Self {
        Self { refresh_interval_secs: 600, page_size: 1000 }
    }
}

impl ResolverConf {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

impl Default for FilterConf {
    fn default() -> Self {
        Self { ttl_secs: 300, jitter_secs: 60 }
    }
}

impl Default for SnapshotConf {
    fn default() -> Self {
        Self {
            key_prefix: "symbion:hostsnap:snapshot:".into(),
            ttl_secs: 600,
        }
    }
}

impl SnapshotConf {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for IngestConf {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self { workers, queue_size: 400 }
    }
}

impl Default for HealthConf {
    fn default() -> Self {
        Self { publish_interval_secs: 30 }
    }
}

pub async fn load_config() -> HostsnapConfig {
    let path = std::env::var("SYMBION_HOSTSNAP_CONFIG").unwrap_or_else(|_| "hostsnap.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return HostsnapConfig::default();
        }
        parse_config(&txt).unwrap_or_else(|e| {
            warn!("invalid config {path}: {e}, using defaults");
            HostsnapConfig::default()
        })
    } else {
        warn!("no {path} found, using default config");
        HostsnapConfig::default()
    }
}

pub fn parse_config(txt: &str) -> Result<HostsnapConfig, serde_yaml::Error> {
    serde_yaml::from_str(txt)
}
