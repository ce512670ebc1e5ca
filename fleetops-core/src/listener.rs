use futures::{Stream, StreamExt};
use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::models::BrokerEndpoint;

/// How long `close` waits for in-flight deliveries once the consumer is cancelled.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// What a collector gathered before it stopped.
#[derive(Debug, Default)]
pub struct Collected {
    /// Decoded messages in delivery order; undecodable ones are left out.
    pub messages: Vec<Value>,
    /// First failure seen: decode, stream, task or teardown.
    pub error: Option<FleetError>,
}

impl Collected {
    fn record(&mut self, e: FleetError) {
        if self.error.is_none() {
            self.error = Some(e);
        } else {
            warn!("additional listener error: {}", e);
        }
    }

    /// The messages, or the first error if there was one.
    pub fn into_result(self) -> Result<Vec<Value>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.messages),
        }
    }
}

/// Forwards decoded deliveries from a stream into an mpsc channel, in order.
///
/// The spawned task is the only producer; [`DeliveryCollector::finish`] joins
/// it before draining, so nothing forwarded before the stream ended is lost.
pub struct DeliveryCollector {
    task: JoinHandle<()>,
    receiver: mpsc::UnboundedReceiver<Result<Value>>,
    forwarded: Arc<AtomicUsize>,
}

impl DeliveryCollector {
    pub fn spawn<S, E>(deliveries: S) -> Self
    where
        S: Stream<Item = std::result::Result<Vec<u8>, E>> + Send + 'static,
        E: Into<FleetError> + Send + 'static,
    {
        let (tx, receiver) = mpsc::unbounded_channel();
        let forwarded = Arc::new(AtomicUsize::new(0));
        let counter = forwarded.clone();

        let task = tokio::spawn(async move {
            let mut deliveries = Box::pin(deliveries);
            let mut index = 0usize;
            while let Some(delivery) = deliveries.next().await {
                let (item, fatal) = match delivery {
                    Ok(payload) => {
                        let decoded = serde_json::from_slice::<Value>(&payload).map_err(|source| {
                            warn!("message #{} is not JSON: {}", index, String::from_utf8_lossy(&payload));
                            FleetError::Decode { index, source }
                        });
                        (decoded, false)
                    }
                    Err(e) => (Err(e.into()), true),
                };
                debug!("delivery #{} forwarded", index);
                index += 1;
                counter.fetch_add(1, Ordering::SeqCst);
                if tx.send(item).is_err() || fatal {
                    break;
                }
            }
        });

        Self { task, receiver, forwarded }
    }

    /// Deliveries seen so far, decodable or not.
    pub fn forwarded(&self) -> usize {
        self.forwarded.load(Ordering::SeqCst)
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    /// Waits up to `grace` for the delivery stream to end, then returns the
    /// buffer in delivery order. The first undecodable message or stream
    /// error is returned instead.
    pub async fn finish(self, grace: Duration) -> Result<Vec<Value>> {
        self.collect(grace).await.into_result()
    }

    /// Like [`DeliveryCollector::finish`], but keeps the decoded messages
    /// next to the first error.
    pub async fn collect(mut self, grace: Duration) -> Collected {
        let joined = match tokio::time::timeout(grace, &mut self.task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("delivery stream still open after {:?}, aborting collector", grace);
                self.task.abort();
                (&mut self.task).await
            }
        };
        let mut collected = Collected::default();
        while let Ok(item) = self.receiver.try_recv() {
            match item {
                Ok(message) => collected.messages.push(message),
                Err(e) => collected.record(e),
            }
        }
        match joined {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => collected.record(FleetError::ListenerTask(e.to_string())),
        }
        collected
    }
}

/// Collects JSON messages published to `exchange` with `routing_key`.
///
/// Owns an exclusive server-named queue bound to a direct exchange. The only
/// way to read the buffer is [`MessageListener::close`], which consumes the
/// listener.
pub struct MessageListener {
    connection: Connection,
    channel: Channel,
    queue: String,
    consumer_tag: String,
    collector: DeliveryCollector,
}

impl MessageListener {
    pub async fn connect(exchange: &str, routing_key: &str, endpoint: &BrokerEndpoint) -> Result<Self> {
        let uri = endpoint.amqp_uri()?;
        let connection = Connection::connect(&uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        let queue = queue.name().as_str().to_string();

        channel
            .queue_bind(&queue, exchange, routing_key, QueueBindOptions::default(), FieldTable::default())
            .await?;

        let consumer_tag = format!("fleetops-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let collector = DeliveryCollector::spawn(consumer.map(|delivery| delivery.map(|d| d.data)));
        info!(
            "listening on {}:{} exchange={} key={} queue={}",
            endpoint.address, endpoint.port, exchange, routing_key, queue
        );

        Ok(Self {
            connection,
            channel,
            queue,
            consumer_tag,
            collector,
        })
    }

    /// Name the broker gave to the private queue.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn received(&self) -> usize {
        self.collector.forwarded()
    }

    /// Stops consuming, closes the connection and returns every message
    /// received, in delivery order.
    pub async fn close(self) -> Result<Vec<Value>> {
        self.drain().await.into_result()
    }

    /// Same teardown as [`MessageListener::close`]; decoded messages survive a
    /// bad payload or a failed connection close.
    pub async fn drain(self) -> Collected {
        let Self {
            connection,
            channel,
            queue,
            consumer_tag,
            collector,
        } = self;

        if let Err(e) = channel.basic_cancel(&consumer_tag, BasicCancelOptions::default()).await {
            warn!("cancel of consumer {} failed: {}", consumer_tag, e);
            collector.abort();
        }
        let mut collected = collector.collect(CLOSE_GRACE).await;
        if let Err(e) = connection.close(200, "OK").await {
            collected.record(e.into());
        }

        info!("listener on {} closed with {} messages", queue, collected.messages.len());
        collected
    }
}
