/*!
Health du service

Compteurs de messages, statut MQTT, taille et âge de la génération active,
taille du filtre négatif. Publié périodiquement sur MQTT et servi par
`GET /system/health`.
*/

use crate::config::{HealthConf, MqttConf};
use crate::engine::{Outcome, ReconciliationEngine};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageCounters {
    pub received: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub dropped: u64,
    pub failed: u64,
    pub shed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HostsnapHealth {
    pub uptime_seconds: u64,
    pub messages: MessageCounters,
    pub hosts_cached: usize,
    pub generation_age_seconds: i64,
    pub negative_entries: usize,
    pub mqtt_status: String,
    pub mqtt_reconnects: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    updated: AtomicU64,
    unchanged: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    shed: AtomicU64,
    mqtt_reconnects: AtomicU64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.counters.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn record_received(&self) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Message dropped because the ingest queue was full.
    pub fn record_shed(&self) {
        self.counters.shed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Updated { .. } => &self.counters.updated,
            Outcome::Unchanged { .. } => &self.counters.unchanged,
            Outcome::Dropped(_) => &self.counters.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> MessageCounters {
        let c = &self.counters;
        MessageCounters {
            received: c.received.load(Ordering::Relaxed),
            updated: c.updated.load(Ordering::Relaxed),
            unchanged: c.unchanged.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            shed: c.shed.load(Ordering::Relaxed),
        }
    }

    pub fn get_health(&self, engine: &ReconciliationEngine) -> HostsnapHealth {
        let generation = engine.resolver().generation();
        let age = OffsetDateTime::now_utc() - generation.built_at();

        HostsnapHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            messages: self.counters(),
            hosts_cached: generation.len(),
            generation_age_seconds: age.whole_seconds().max(0),
            negative_entries: engine.filter().len(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.counters.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }

    /// Publishes the health document on `mqtt.health_topic` every
    /// `publish_interval_secs`.
    pub fn spawn_health_publisher(
        &self,
        engine: Arc<ReconciliationEngine>,
        mqtt_cfg: MqttConf,
        health_cfg: HealthConf,
    ) -> JoinHandle<()> {
        let health_tracker = self.clone();

        task::spawn(async move {
            let client_id = format!("symbion-hostsnap-health-{}", uuid::Uuid::new_v4().simple());
            let mut opts = MqttOptions::new(client_id, &mqtt_cfg.host, mqtt_cfg.port);
            opts.set_keep_alive(Duration::from_secs(mqtt_cfg.keep_alive_secs));

            let (client, mut eventloop) = AsyncClient::new(opts, 10);
            let mut interval = tokio::time::interval(Duration::from_secs(health_cfg.publish_interval_secs.max(1)));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let health = health_tracker.get_health(&engine);
                        match serde_json::to_string(&health) {
                            Ok(payload) => {
                                if let Err(e) = client.publish(&mqtt_cfg.health_topic, QoS::AtLeastOnce, false, payload).await {
                                    warn!("failed to publish health: {e:?}");
                                } else {
                                    debug!(uptime = health.uptime_seconds, hosts = health.hosts_cached, "published health");
                                }
                            }
                            Err(e) => warn!("failed to serialize health: {e}"),
                        }
                    },
                    event = eventloop.poll() => {
                        if let Err(e) = event {
                            warn!("health MQTT error: {e:?}");
                            tokio::time::sleep(Duration::from_secs(2)).await;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DropReason;

    #[test]
    fn test_outcomes_land_in_their_counter() {
        let tracker = HealthTracker::new();
        tracker.record_received();
        tracker.record_received();
        tracker.record_outcome(&Outcome::Unchanged { host_id: 1 });
        tracker.record_outcome(&Outcome::Dropped(DropReason::Suppressed));
        tracker.record_shed();

        let counters = tracker.counters();
        assert_eq!(counters.received, 2);
        assert_eq!(counters.unchanged, 1);
        assert_eq!(counters.dropped, 1);
        assert_eq!(counters.updated, 0);
        assert_eq!(counters.shed, 1);
    }

    #[test]
    fn test_mqtt_status_transitions() {
        let tracker = HealthTracker::new();
        assert_eq!(*tracker.mqtt_status.lock(), "connecting");
        tracker.increment_reconnects();
        assert_eq!(*tracker.mqtt_status.lock(), "reconnecting");
        tracker.mark_mqtt_connected();
        assert_eq!(*tracker.mqtt_status.lock(), "connected");
    }
}
