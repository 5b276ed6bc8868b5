/*!
Interface du store hôtes

Système de référence des documents hôtes. Le résolveur le pagine pour construire
ses générations et s'y replie sur un miss; le moteur y écrit les attributs modifiés.
*/

mod json_file;

pub use json_file::JsonFileStore;

use crate::models::{Attributes, HostRecord};
use async_trait::async_trait;

/// Errors raised by a host store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait HostStore: Send + Sync {
    /// Hosts in `cloud_id` whose inner IP is one of `ips`.
    async fn find_by_inner_ips(&self, cloud_id: i64, ips: &[String]) -> Result<Vec<HostRecord>, StoreError>;

    /// One page of the full host collection, ordered by host id.
    async fn list_page(&self, start: u64, limit: u64) -> Result<Vec<HostRecord>, StoreError>;

    /// Sets `changes` on the host with `host_id`. Returns the number of
    /// matched hosts; zero is not an error.
    async fn update_host(&self, host_id: i64, changes: &Attributes) -> Result<u64, StoreError>;
}
