/*!
# fleetops core

Colle pour tests d'intégration pilotant une flotte de machines et un
broker partagé :
- inventaire statique des hôtes (YAML)
- commandes distantes via SSH
- attente qu'une queue se vide (API management HTTP)
- écoute d'un exchange AMQP et collecte des messages JSON
*/

pub mod cluster;
pub mod error;
pub mod inventory;
pub mod listener;
pub mod models;
pub mod queue;
pub mod remote;

pub use cluster::Cluster;
pub use error::{FleetError, Result};
pub use inventory::{Inventory, DEFAULT_INVENTORY_PATH};
pub use listener::{Collected, DeliveryCollector, MessageListener};
pub use models::{BrokerEndpoint, Defaults, HostRecord, ManagementEndpoint, SshTarget};
pub use queue::{ManagementClient, PollOptions, QueueDepthSource};
pub use remote::{CommandOutput, CommandRunner, RunOptions, SshRunner};
