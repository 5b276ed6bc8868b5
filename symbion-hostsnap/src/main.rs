/**
 * SYMBION HOSTSNAP - Point d'entrée du service de réconciliation
 *
 * RÔLE : Bootstrap du pipeline : config, store hôtes, cache snapshots, filtre
 * négatif, résolveur (double génération), workers d'ingestion MQTT, health, HTTP.
 *
 * TÂCHES DE FOND : refresh du cache hôtes, sweep du filtre négatif, purge des
 * snapshots expirés, publication health. Toutes vivent jusqu'à l'arrêt du process.
 */

use anyhow::{Context, Result};
use std::sync::Arc;
use symbion_hostsnap::config::load_config;
use symbion_hostsnap::engine::ReconciliationEngine;
use symbion_hostsnap::filter::NegativeResultFilter;
use symbion_hostsnap::health::HealthTracker;
use symbion_hostsnap::http::{self, AppState};
use symbion_hostsnap::mqtt;
use symbion_hostsnap::resolver::HostResolver;
use symbion_hostsnap::snapcache::MemorySnapshotCache;
use symbion_hostsnap::store::{HostStore, JsonFileStore};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    let store: Arc<dyn HostStore> = Arc::new(
        JsonFileStore::open(&cfg.store.path).with_context(|| format!("failed to open host store {}", cfg.store.path))?,
    );

    let snapshots = Arc::new(MemorySnapshotCache::new());
    snapshots.spawn_janitor(cfg.snapshot.ttl().max(std::time::Duration::from_secs(1)));

    let filter = Arc::new(NegativeResultFilter::new(&cfg.filter));
    filter.spawn_sweeper();

    let resolver = Arc::new(HostResolver::new(Arc::clone(&store), &cfg.resolver));
    resolver.spawn_refresh_loop();

    let engine = Arc::new(ReconciliationEngine::new(
        resolver,
        filter,
        store,
        snapshots.clone(),
        cfg.snapshot.clone(),
    ));

    let health_tracker = HealthTracker::new();
    health_tracker.spawn_health_publisher(Arc::clone(&engine), cfg.mqtt.clone(), cfg.health.clone());

    let (dispatcher, _workers) = mqtt::spawn_workers(Arc::clone(&engine), health_tracker.clone(), &cfg.ingest);
    mqtt::spawn_mqtt_listener(cfg.mqtt.clone(), dispatcher, health_tracker.clone());

    let app = http::build_router(AppState {
        engine,
        health_tracker,
        snapshots,
        snapshot_prefix: cfg.snapshot.key_prefix.clone(),
    });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!("listening on http://{}", cfg.http.bind);
    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}
