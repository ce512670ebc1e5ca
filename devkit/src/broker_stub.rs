/*!
Broker simulé pour développement sans RabbitMQ

- `MockBroker` : exchange direct en mémoire, alimente des `DeliveryCollector`
- `MockManagementApi` : profondeurs de queue scriptées pour le poller
Enregistre tous les messages publiés et tous les appels à l'API management.
*/

use anyhow::Result;
use async_trait::async_trait;
use fleetops_core::{DeliveryCollector, FleetError, ManagementEndpoint, QueueDepthSource};
use futures::channel::mpsc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

type DeliverySender = mpsc::UnboundedSender<std::result::Result<Vec<u8>, FleetError>>;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

struct Binding {
    exchange: String,
    routing_key: String,
    sender: DeliverySender,
}

/// Exchange direct en mémoire : un message va à chaque binding dont
/// l'exchange et la routing key correspondent exactement.
#[derive(Clone, Default)]
pub struct MockBroker {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    bindings: Arc<Mutex<Vec<Binding>>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Équivalent d'une queue exclusive liée à `exchange` / `routing_key`
    pub fn bind(&self, exchange: &str, routing_key: &str) -> DeliveryCollector {
        let (sender, receiver) = mpsc::unbounded();
        self.bindings.lock().push(Binding {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            sender,
        });
        log::info!("📥 [MOCK] Bound queue to {}/{}", exchange, routing_key);
        DeliveryCollector::spawn(receiver)
    }

    /// Publie un message brut ; renvoie le nombre de queues qui l'ont reçu
    pub fn publish<V: Into<Vec<u8>>>(&self, exchange: &str, routing_key: &str, payload: V) -> usize {
        let message = MockMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.into(),
        };

        let mut routed = 0;
        for binding in self.bindings.lock().iter() {
            if binding.exchange == message.exchange
                && binding.routing_key == message.routing_key
                && binding.sender.unbounded_send(Ok(message.payload.clone())).is_ok()
            {
                routed += 1;
            }
        }

        log::info!(
            "📤 [MOCK] Published to {}/{}: {} bytes ({} queues)",
            message.exchange,
            message.routing_key,
            message.payload.len(),
            routed
        );
        self.published_messages.lock().push(message);
        routed
    }

    pub fn publish_json(&self, exchange: &str, routing_key: &str, payload: &Value) -> Result<usize> {
        Ok(self.publish(exchange, routing_key, serde_json::to_vec(payload)?))
    }

    /// Coupe toutes les queues : les collectors voient la fin du flux
    pub fn disconnect(&self) {
        let count = self.bindings.lock().drain(..).count();
        log::info!("🔌 [MOCK] Disconnected {} queues", count);
    }

    /// Simule une erreur côté broker sur toutes les queues
    pub fn fail_all(&self, reason: &str) {
        for binding in self.bindings.lock().drain(..) {
            let _ = binding
                .sender
                .unbounded_send(Err(FleetError::ListenerTask(reason.to_string())));
        }
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    pub fn find_messages_by_routing_key(&self, routing_key: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.routing_key == routing_key)
            .cloned()
            .collect()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn clear(&self) {
        self.published_messages.lock().clear();
        self.bindings.lock().clear();
    }
}

/// Un appel reçu par l'API management simulée
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCall {
    pub address: String,
    pub port: u16,
    pub vhost: String,
    pub queue: String,
}

/// API management simulée : chaque queue rejoue une suite de profondeurs,
/// la dernière valeur étant répétée indéfiniment.
#[derive(Clone, Default)]
pub struct MockManagementApi {
    depths: Arc<Mutex<HashMap<String, VecDeque<u64>>>>,
    calls: Arc<Mutex<Vec<QueueCall>>>,
}

impl MockManagementApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script<I: IntoIterator<Item = u64>>(&self, queue: &str, depths: I) -> &Self {
        let depths: VecDeque<u64> = depths.into_iter().collect();
        assert!(!depths.is_empty(), "a scripted queue needs at least one depth");
        self.depths.lock().insert(queue.to_string(), depths);
        self
    }

    pub fn calls(&self) -> Vec<QueueCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl QueueDepthSource for MockManagementApi {
    async fn queue_depth(&self, endpoint: &ManagementEndpoint, vhost: &str, queue: &str) -> fleetops_core::Result<u64> {
        self.calls.lock().push(QueueCall {
            address: endpoint.address.clone(),
            port: endpoint.port,
            vhost: vhost.to_string(),
            queue: queue.to_string(),
        });

        let mut depths = self.depths.lock();
        let Some(script) = depths.get_mut(queue) else {
            return Err(FleetError::Management {
                status: 404,
                body: r#"{"error":"Object Not Found","reason":"Not Found"}"#.to_string(),
            });
        };
        let depth = if script.len() > 1 {
            script.pop_front().unwrap_or_default()
        } else {
            script.front().copied().unwrap_or_default()
        };
        log::debug!("📊 [MOCK] {}/{} depth={}", vhost, queue, depth);
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_direct_routing() {
        let broker = MockBroker::new();
        let matching = broker.bind("test", "key-a");
        let other = broker.bind("test", "key-b");

        assert_eq!(broker.publish("test", "key-a", br#"{"n":1}"#.to_vec()), 1);
        assert_eq!(broker.publish("other-exchange", "key-a", b"{}".to_vec()), 0);
        broker.disconnect();

        let got = matching.finish(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got, vec![serde_json::json!({"n": 1})]);
        assert!(other.finish(Duration::from_secs(1)).await.unwrap().is_empty());
        assert_eq!(broker.get_published_messages().len(), 2);
        assert_eq!(broker.find_messages_by_routing_key("key-a").len(), 2);
    }

    #[tokio::test]
    async fn test_broker_failure_reaches_collector() {
        let broker = MockBroker::new();
        let collector = broker.bind("test", "k");
        broker.fail_all("connection reset");
        assert!(collector.finish(Duration::from_secs(1)).await.is_err());
        assert_eq!(broker.binding_count(), 0);
    }

    #[tokio::test]
    async fn test_scripted_depths() {
        let api = MockManagementApi::new();
        api.script("jobs", [2, 0]);
        let endpoint = ManagementEndpoint {
            address: "10.0.0.1".into(),
            port: 15672,
            username: "guest".into(),
            password: "guest".into(),
        };

        assert_eq!(api.queue_depth(&endpoint, "/", "jobs").await.unwrap(), 2);
        assert_eq!(api.queue_depth(&endpoint, "/", "jobs").await.unwrap(), 0);
        assert_eq!(api.queue_depth(&endpoint, "/", "jobs").await.unwrap(), 0);
        assert!(api.queue_depth(&endpoint, "/", "missing").await.is_err());
        assert_eq!(api.call_count(), 4);
        assert_eq!(api.calls()[0].address, "10.0.0.1");
    }
}
