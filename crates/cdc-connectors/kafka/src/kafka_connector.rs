use async_trait::async_trait;
use cdc_core::{BrokerSubscriber, DeliverySink, Error, RawMessage, Result, Subscription};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Headers, Message};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Kafka brokers
    pub brokers: Vec<String>,

    /// Where a fresh session group starts reading
    pub auto_offset_reset: String,

    pub session_timeout_ms: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            auto_offset_reset: "latest".to_string(),
            session_timeout_ms: 10_000,
        }
    }
}

/// Opens one consumer group per relay session
pub struct KafkaSubscriber {
    config: KafkaConfig,
}

impl KafkaSubscriber {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    fn client_config(&self, group_id: &str) -> ClientConfig {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", self.config.brokers.join(","))
            .set("group.id", group_id)
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set("session.timeout.ms", self.config.session_timeout_ms.to_string())
            // Session groups are throwaway, nothing to resume from.
            .set("enable.auto.commit", "false");
        client
    }
}

#[async_trait]
impl BrokerSubscriber for KafkaSubscriber {
    async fn subscribe(
        &self,
        group_id: &str,
        topics: &[String],
        sink: DeliverySink,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Subscription>> {
        info!(
            "[{}] Connecting to Kafka brokers: {:?}",
            group_id, self.config.brokers
        );

        let consumer: StreamConsumer = self
            .client_config(group_id)
            .create()
            .map_err(|e| Error::Connection(format!("Failed to create Kafka consumer: {}", e)))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| Error::Connection(format!("Failed to subscribe: {}", e)))?;

        let stop = cancel.child_token();
        let task = tokio::spawn(pump(consumer, sink, stop.clone(), group_id.to_string()));

        Ok(Box::new(KafkaSubscription { stop, task }))
    }
}

struct KafkaSubscription {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn close(self: Box<Self>) -> Result<()> {
        self.stop.cancel();
        self.task
            .await
            .map_err(|e| Error::Stream(format!("Kafka consumer task failed: {}", e)))
    }
}

async fn pump(
    consumer: StreamConsumer,
    sink: DeliverySink,
    stop: CancellationToken,
    group_id: String,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            received = consumer.recv() => match received {
                Ok(message) => {
                    if !sink.deliver(to_raw(&message)) {
                        debug!("[{}] Session gone, stopping consumer", group_id);
                        break;
                    }
                }
                Err(e) if is_fatal(&e) => {
                    error!("[{}] Kafka consumer failed: {}", group_id, e);
                    sink.fail(e.to_string());
                    break;
                }
                Err(e) => warn!("[{}] Kafka error: {}", group_id, e),
            }
        }
    }

    consumer.unsubscribe();
    info!("[{}] Left consumer group", group_id);
}

/// Sides that are not valid UTF-8 are dropped, so the relay reports the message
/// as unrecognized instead of classifying altered text.
fn to_raw<M: Message>(message: &M) -> RawMessage {
    let text = |side: &str, bytes: &[u8]| match std::str::from_utf8(bytes) {
        Ok(text) => Some(text.to_string()),
        Err(e) => {
            warn!(
                "{}@{}: {} is not valid UTF-8: {}",
                message.topic(),
                message.offset(),
                side,
                e
            );
            None
        }
    };
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| (h.key.to_string(), h.value.and_then(|v| text("header", v))))
                .collect()
        })
        .unwrap_or_default();

    RawMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp_ms: message.timestamp().to_millis(),
        headers,
        key: message.key().and_then(|k| text("key", k)),
        value: message.payload().and_then(|v| text("value", v)),
    }
}

fn is_fatal(e: &KafkaError) -> bool {
    matches!(e, KafkaError::MessageConsumptionFatal(_))
        || e.rdkafka_error_code() == Some(RDKafkaErrorCode::AllBrokersDown)
}
