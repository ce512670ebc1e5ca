/*!
Test Harness pour scripts d'intégration fleetops

Facilite l'écriture de tests avec:
- Inventaires écrits dans un répertoire temporaire
- `Cluster` branché sur le runner et l'API management simulés
- Broker en mémoire pour les listeners
*/

use crate::broker_stub::{MockBroker, MockManagementApi};
use crate::fixtures::InventoryBuilder;
use crate::runner_stub::MockCommandRunner;
use anyhow::Result;
use fleetops_core::{Cluster, DeliveryCollector};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Harness de test complet
pub struct TestHarness {
    pub broker: MockBroker,
    pub management: MockManagementApi,
    pub runner: MockCommandRunner,
    dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        Ok(Self {
            broker: MockBroker::new(),
            management: MockManagementApi::new(),
            runner: MockCommandRunner::new(),
            dir: TempDir::new()?,
        })
    }

    /// Écrit un inventaire YAML brut et renvoie son chemin
    pub fn write_inventory(&self, name: &str, yaml: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, yaml)?;
        Ok(path)
    }

    pub fn write_fixture(&self, name: &str, inventory: &InventoryBuilder) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        inventory.write_to(&path)?;
        Ok(path)
    }

    /// Chemin garanti inexistant dans le répertoire temporaire
    pub fn missing_path(&self) -> PathBuf {
        self.dir.path().join("whatisthis?")
    }

    /// Charge l'inventaire et branche les doubles de test
    pub fn cluster(&self, inventory: &InventoryBuilder) -> Result<Cluster> {
        let path = self.write_fixture("inventory.yml", inventory)?;
        let cluster = Cluster::load(&path)?
            .with_runner(Arc::new(self.runner.clone()))
            .with_depth_source(Arc::new(self.management.clone()));
        log::info!("🧪 Cluster ready with {} hosts", cluster.inventory().len());
        Ok(cluster)
    }

    /// Équivalent en mémoire de `Cluster::create_listener`
    pub fn listen(&self, exchange: &str, routing_key: &str) -> DeliveryCollector {
        self.broker.bind(exchange, routing_key)
    }

    pub fn get_stats(&self) -> TestStats {
        let mut routing_key_counts = HashMap::new();
        for msg in self.broker.get_published_messages() {
            *routing_key_counts.entry(msg.routing_key).or_insert(0) += 1;
        }

        TestStats {
            total_messages: routing_key_counts.values().sum(),
            routing_key_counts,
            management_calls: self.management.call_count(),
            commands_run: self.runner.invocations().len(),
        }
    }
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub routing_key_counts: HashMap<String, usize>,
    pub management_calls: usize,
    pub commands_run: usize,
}

impl TestStats {
    pub fn print(&self) {
        println!("📊 Test Statistics:");
        println!("  Total messages: {}", self.total_messages);
        for (key, count) in &self.routing_key_counts {
            println!("    {}: {} messages", key, count);
        }
        println!("  Management API calls: {}", self.management_calls);
        println!("  Remote commands: {}", self.commands_run);
    }
}

/// Fixe le type de sortie du corps d'un `fleet_test!` (pour que `?` s'infère)
#[doc(hidden)]
pub fn test_body<F>(body: F) -> F
where
    F: std::future::Future<Output = Result<()>>,
{
    body
}

/// Macro pour créer facilement des tests avec harness
#[macro_export]
macro_rules! fleet_test {
    ($name:ident, |$harness:ident| $body:block) => {
        #[tokio::test]
        async fn $name() {
            let $harness = $crate::test_utils::TestHarness::new().expect("test harness");
            let outcome = $crate::test_utils::test_body(async { $body }).await;

            match outcome {
                Ok(()) => {
                    $harness.get_stats().print();
                    println!("✅ Test '{}' passed", stringify!($name));
                }
                Err(e) => panic!("Test '{}' failed: {:#}", stringify!($name), e),
            }
        }
    };
}
