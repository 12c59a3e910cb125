use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{TripError, TripResult};
use crate::models::message::{BusEvent, ServerMessage};
use crate::relay::groups::GroupRegistry;

/// Producer side of the bus bridge. The relay depends on this seam so tests
/// can capture published events without a broker.
#[async_trait]
pub trait LocationPublisher: Send + Sync {
    async fn publish(&self, event: &BusEvent) -> TripResult<()>;
}

fn base_client_config(config: &AppConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        // SASL Configuration
        .set("security.protocol", &config.kafka_security_protocol)
        .set("sasl.mechanism", &config.kafka_sasl_mechanism)
        .set("sasl.username", &config.kafka_username)
        .set("sasl.password", &config.kafka_password);
    client_config
}

/// Publishes location events onto the durable topic, keyed by room name so
/// per-trip ordering survives partitioning.
pub struct KafkaLocationPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaLocationPublisher {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let producer: FutureProducer = base_client_config(config)
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self {
            producer,
            topic: config.kafka_topic.clone(),
        })
    }
}

#[async_trait]
impl LocationPublisher for KafkaLocationPublisher {
    async fn publish(&self, event: &BusEvent) -> TripResult<()> {
        let payload =
            serde_json::to_vec(event).map_err(|e| TripError::Transport(e.to_string()))?;

        let record = FutureRecord::to(&self.topic)
            .key(&event.room_name)
            .payload(&payload);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| TripError::Transport(e.to_string()))?;

        info!("Location event sent to Kafka topic {}", self.topic);
        Ok(())
    }
}

/// Deserializes one bus payload and fans it out to the event's room.
/// Returns the number of connections the update was delivered to.
pub async fn dispatch_bus_payload(groups: &GroupRegistry, payload: &[u8]) -> TripResult<usize> {
    let event: BusEvent =
        serde_json::from_slice(payload).map_err(|e| TripError::Transport(e.to_string()))?;

    let update = ServerMessage::LocationUpdate {
        message: event.message,
    };
    Ok(groups.broadcast(&event.room_name, &update.to_json()).await)
}

/// Long-running consumer: reads the location topic (from the earliest
/// retained offset the first time this group runs) and re-publishes each
/// event to the in-process broadcast groups.
///
/// Individual message failures are logged without killing the loop; repeated
/// broker failures trip a circuit breaker and back off for a cooldown.
pub async fn start_location_consumer(
    config: &AppConfig,
    groups: Arc<GroupRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!("Initializing Kafka consumer for topic: {}", config.kafka_topic);

    let consumer: StreamConsumer = base_client_config(config)
        .set("group.id", &config.kafka_group_id)
        .set("auto.offset.reset", &config.kafka_auto_offset_reset)
        .create()?;

    consumer.subscribe(&[&config.kafka_topic])?;
    info!("Subscribed to topic: {}", config.kafka_topic);

    let mut consecutive_failures = 0;
    let max_retries = config.kafka_max_retries;
    let cooldown_duration = Duration::from_secs(config.kafka_circuit_breaker_cooldown);

    loop {
        // Circuit Breaker Check
        if consecutive_failures >= max_retries {
            warn!(
                "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                consecutive_failures, config.kafka_circuit_breaker_cooldown
            );
            tokio::select! {
                _ = tokio::time::sleep(cooldown_duration) => {}
                _ = shutdown.changed() => break,
            }
            consecutive_failures = 0;
            info!("Circuit breaker reset. Resuming consumption.");
        }

        let received = tokio::select! {
            received = consumer.recv() => received,
            _ = shutdown.changed() => break,
        };

        match received {
            Ok(m) => {
                consecutive_failures = 0;

                let payload = match m.payload() {
                    None => {
                        warn!("Received empty payload from Kafka");
                        continue;
                    }
                    Some(p) => p,
                };

                match dispatch_bus_payload(&groups, payload).await {
                    Ok(delivered) => {
                        info!("Broadcast location update to {delivered} connections");
                    }
                    Err(e) => {
                        error!("Error processing location event: {e}");
                    }
                }
            }
            Err(e) => {
                error!(
                    "Kafka error: {}. Incrementing failure count ({} / {})",
                    e,
                    consecutive_failures + 1,
                    max_retries
                );
                consecutive_failures += 1;

                // Small delay to prevent tight loop in case of minor network glitches
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    // Stop consuming before dropping the client so already-committed
    // positions are what the next run resumes from.
    consumer.unsubscribe();
    info!("Kafka consumer stopped");
    Ok(())
}
