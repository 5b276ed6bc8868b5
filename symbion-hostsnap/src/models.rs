/*!
Modèles hôtes

Enregistrements tels que stockés par le système de référence, et clé de
recherche `(zone cloud, ip interne)` de l'index mémoire.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Flat attribute map: attribute name -> scalar value (string, integer, bool).
pub type Attributes = BTreeMap<String, Value>;

pub const HOST_ID_FIELD: &str = "bk_host_id";
pub const CLOUD_ID_FIELD: &str = "bk_cloud_id";
pub const INNER_IP_FIELD: &str = "bk_host_innerip";
pub const OUTER_IP_FIELD: &str = "bk_host_outerip";

/// A host document from the store.
///
/// The identity fields are typed; everything else is kept as a flat attribute
/// map so the record round-trips through the store unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    #[serde(rename = "bk_host_id")]
    pub host_id: i64,
    #[serde(rename = "bk_cloud_id", default)]
    pub cloud_id: i64,
    #[serde(rename = "bk_host_innerip", default)]
    pub inner_ip: String,
    #[serde(rename = "bk_host_outerip", default, skip_serializing_if = "Option::is_none")]
    pub outer_ip: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl HostRecord {
    pub fn new(host_id: i64, cloud_id: i64, inner_ip: impl Into<String>) -> Self {
        Self {
            host_id,
            cloud_id,
            inner_ip: inner_ip.into(),
            outer_ip: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn key(&self) -> HostKey {
        HostKey::new(self.cloud_id, &self.inner_ip)
    }

    /// Outer IP, treating an empty string as absent.
    pub fn outer_ip(&self) -> Option<&str> {
        self.outer_ip.as_deref().filter(|ip| !ip.is_empty())
    }
}

/// `(cloud area, inner ip)` lookup identity, rendered as `cloudid::ip`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostKey {
    pub cloud_id: i64,
    pub inner_ip: String,
}

impl HostKey {
    pub fn new(cloud_id: i64, inner_ip: &str) -> Self {
        Self { cloud_id, inner_ip: inner_ip.to_string() }
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.cloud_id, self.inner_ip)
    }
}

/// Keys of `observed` whose value differs from (or is missing in) `current`.
///
/// Values compare exactly: strings are case-sensitive and `4` differs from
/// `4.0`.
pub fn diff_attributes(current: &Attributes, observed: &Attributes) -> Attributes {
    observed
        .iter()
        .filter(|(name, value)| current.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
