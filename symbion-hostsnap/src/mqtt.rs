/*!
Ingestion MQTT

Le listener pousse chaque payload dans une file bornée; un pool fixe de workers
la vide via [`ReconciliationEngine::analyze`]. File pleine: le message entrant
est abandonné au lieu de bloquer l'event loop.
*/

use crate::config::{IngestConf, MqttConf};
use crate::engine::ReconciliationEngine;
use crate::health::HealthTracker;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const THROUGHPUT_LOG_EVERY: u64 = 10_000;

/// Producer side of the ingest queue.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<String>,
    health: HealthTracker,
}

impl Dispatcher {
    /// Queues one message. Returns false when it was shed.
    pub fn dispatch(&self, payload: String) -> bool {
        self.health.record_received();
        match self.tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.health.record_shed();
                warn!("ingest queue full, message shed");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("ingest workers gone, message lost");
                false
            }
        }
    }
}

/// Creates the ingest queue and its worker pool.
pub fn spawn_workers(
    engine: Arc<ReconciliationEngine>,
    health: HealthTracker,
    conf: &IngestConf,
) -> (Dispatcher, Vec<JoinHandle<()>>) {
    let (tx, rx) = mpsc::channel::<String>(conf.queue_size.max(1));
    let rx = Arc::new(Mutex::new(rx));
    let handled = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let workers = (0..conf.workers.max(1))
        .map(|worker| {
            let rx = Arc::clone(&rx);
            let engine = Arc::clone(&engine);
            let health = health.clone();
            let handled = Arc::clone(&handled);

            task::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(payload) = next else {
                        debug!(worker, "ingest queue closed, worker exiting");
                        break;
                    };

                    match engine.analyze(&payload).await {
                        Ok(outcome) => health.record_outcome(&outcome),
                        Err(e) => {
                            health.record_failed();
                            error!(worker, "reconciliation failed: {e}");
                        }
                    }

                    let count = handled.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % THROUGHPUT_LOG_EVERY == 0 {
                        let secs = started.elapsed().as_secs_f64().max(f64::EPSILON);
                        let per_sec = (count as f64 / secs * 10.0).round() / 10.0;
                        info!(handled = count, per_sec, "ingest throughput");
                    }
                }
            })
        })
        .collect();

    info!(workers = conf.workers.max(1), queue = conf.queue_size.max(1), "ingest workers started");
    (Dispatcher { tx, health }, workers)
}

/// Subscribes to the snapshot topic and feeds the dispatcher for the life of
/// the process. Resubscribes on every (re)connection.
pub fn spawn_mqtt_listener(cfg: MqttConf, dispatcher: Dispatcher, health: HealthTracker) -> JoinHandle<()> {
    task::spawn(async move {
        let client_id = format!("symbion-hostsnap-{}", uuid::Uuid::new_v4().simple());
        let mut opts = MqttOptions::new(client_id, &cfg.host, cfg.port);
        opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);

        info!(host = %cfg.host, port = cfg.port, topic = %cfg.topic, "starting MQTT listener");
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    if let Err(e) = client.subscribe(&cfg.topic, QoS::AtLeastOnce).await {
                        error!("subscribe {} failed: {e:?}", cfg.topic);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == cfg.topic => {
                    match String::from_utf8(p.payload.to_vec()) {
                        Ok(txt) => {
                            dispatcher.dispatch(txt);
                        }
                        Err(_) => debug!("non UTF-8 payload on {}, ignored", p.topic),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT error: {e:?}");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}
