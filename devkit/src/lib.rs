/*!
# Redfish DevKit - Mock BMC et utilitaires de test

Bibliothèque facilitant le développement et les tests de l'exporter sans matériel :
- Mock BMC Redfish sur vrai HTTP (sessions, basic auth, injection de pannes)
- Builders de payloads pour les documents capteurs
- Harness de test avec assertions sur le journal des requêtes
*/

pub mod fixtures;
pub mod redfish_stub;
pub mod test_utils;

pub use fixtures::{MiramarChassis, RedfishPayloadBuilder};
pub use redfish_stub::{Fault, MockBmc, RunningBmc};
pub use test_utils::TestHarness;
