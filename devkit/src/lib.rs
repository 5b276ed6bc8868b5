/*!
# Symbion DevKit - Fakes et utilitaires de test pour HostSnap

Bibliothèque facilitant les tests du pipeline de réconciliation avec:
- Store hôtes en mémoire (compteurs d'appels, injection de pannes)
- Cache snapshots enregistreur
- Builders de messages de télémétrie
- Harness câblant un moteur complet sur les fakes
*/

pub mod fake_store;
pub mod fixtures;
pub mod snap_cache;
pub mod test_utils;

pub use fake_store::MemoryHostStore;
pub use fixtures::SnapshotBuilder;
pub use snap_cache::RecordingSnapshotCache;
pub use test_utils::TestHarness;
