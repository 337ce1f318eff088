use async_trait::async_trait;
use glow_order::OrderEventSink;
use glow_shared::models::events::OrderEvent;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, error};

/// How long a send may wait for room in the local producer queue
const QUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// Kafka publisher for order lifecycle events.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            // Retries must not duplicate or reorder events of one order
            .set("enable.idempotence", "true")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn send_json(&self, topic: &str, key: &str, payload: &str) -> Result<(), KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, Timeout::After(QUEUE_TIMEOUT))
            .await
            .map(|delivery| {
                debug!(topic, key, partition = delivery.partition, offset = delivery.offset, "event delivered");
            })
            .map_err(|(e, _)| {
                error!(topic, key, error = %e, "event delivery failed");
                e
            })
    }
}

#[async_trait]
impl OrderEventSink for EventProducer {
    async fn publish(&self, event: OrderEvent) -> Result<(), String> {
        let payload = serde_json::to_string(&event).map_err(|e| e.to_string())?;
        // One partition per order keeps its events in order
        let key = event.order_id().to_string();
        self.send_json(event.topic(), &key, &payload).await.map_err(|e| e.to_string())
    }
}
