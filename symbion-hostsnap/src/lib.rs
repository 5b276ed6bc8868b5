/*!
# Symbion HostSnap

Résout les snapshots de télémétrie vers les hôtes enregistrés et ne persiste que
les attributs qui ont changé.
*/

pub mod config;
pub mod engine;
pub mod filter;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod resolver;
pub mod snapcache;
pub mod snapshot;
pub mod store;
