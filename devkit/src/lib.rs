/*!
# fleetops DevKit - Doubles de test et utilitaires

Bibliothèque facilitant l'écriture de tests d'intégration avec:
- Broker AMQP simulé (routage direct en mémoire)
- API management simulée (profondeurs de queue scriptées)
- Runner SSH simulé
- Builders d'inventaire et harness sur répertoire temporaire
*/

pub mod broker_stub;
pub mod fixtures;
pub mod runner_stub;
pub mod test_utils;

pub use broker_stub::{MockBroker, MockManagementApi, MockMessage, QueueCall};
pub use fixtures::{HostEntry, InventoryBuilder};
pub use runner_stub::{Invocation, MockCommandRunner};
pub use test_utils::{TestHarness, TestStats};

#[doc(hidden)]
pub use anyhow;
