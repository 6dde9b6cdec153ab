//! Stream relay: bridges the broker's push-style delivery to a pull-based,
//! cancellable, de-duplicated event sequence scoped to one client session.

use crate::classifier::classify_message;
use crate::event::{CdcEvent, FieldChange, RawMessage};
use crate::profile::{data_topic, schema_topic};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the broker client pushes into a session
#[derive(Debug)]
pub enum Delivery {
    Message(RawMessage),
    /// The subscription died; no further deliveries follow
    Failed(String),
}

/// Producer half handed to the broker client. Never blocks.
#[derive(Debug, Clone)]
pub struct DeliverySink {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl DeliverySink {
    /// Returns false once the session is gone
    pub fn deliver(&self, message: RawMessage) -> bool {
        self.tx.send(Delivery::Message(message)).is_ok()
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.tx.send(Delivery::Failed(reason.into()));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A live broker subscription
#[async_trait]
pub trait Subscription: Send {
    /// Leave the consumer group and release the client
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Broker client able to open consumer-group subscriptions
#[async_trait]
pub trait BrokerSubscriber: Send + Sync {
    /// Subscribe `group_id` to `topics`, pushing every message into `sink` until
    /// `cancel` fires or the subscription is closed.
    async fn subscribe(
        &self,
        group_id: &str,
        topics: &[String],
        sink: DeliverySink,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Subscription>>;
}

/// Whether events the classifier could not recognize reach the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnrecognizedPolicy {
    #[default]
    Deliver,
    Suppress,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Prefix of the per-session consumer group id
    pub group_prefix: String,
    pub unrecognized: UnrecognizedPolicy,
    /// Upper bound for releasing the subscription after cancellation
    pub close_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            group_prefix: "cdc-relay".to_string(),
            unrecognized: UnrecognizedPolicy::Deliver,
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// An event ready for the transport
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayedEvent {
    /// `{sequence}-{offset}`
    pub resume_id: String,
    pub sequence: u64,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: Option<i64>,
    pub event: CdcEvent,
    /// Column diff of a data change, empty for other events
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
}

pub struct StreamRelay {
    subscriber: Arc<dyn BrokerSubscriber>,
    config: RelayConfig,
}

impl StreamRelay {
    pub fn new(subscriber: Arc<dyn BrokerSubscriber>, config: RelayConfig) -> Self {
        Self { subscriber, config }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Open a session on the data-change and schema-change topics of `topic_prefix`.
    /// Cancelling `cancel` ends the sequence and releases the subscription.
    pub async fn open(&self, topic_prefix: &str, cancel: CancellationToken) -> Result<EventSequence> {
        let session_id = format!("{}-{}", self.config.group_prefix, uuid::Uuid::new_v4());
        let topics = vec![data_topic(topic_prefix), schema_topic(topic_prefix)];
        let (tx, rx) = mpsc::unbounded_channel();

        let subscription = self
            .subscriber
            .subscribe(&session_id, &topics, DeliverySink { tx }, cancel.clone())
            .await?;

        info!("[{}] Session opened on {:?}", session_id, topics);

        Ok(EventSequence {
            session_id,
            rx,
            seen: HashSet::new(),
            cancel,
            subscription: Some(subscription),
            policy: self.config.unrecognized,
            close_timeout: self.config.close_timeout,
            sequence: 0,
            finished: false,
        })
    }
}

/// Ordered, de-duplicated events of one session.
///
/// The set of seen `(topic, offset)` pairs lives as long as the session.
pub struct EventSequence {
    session_id: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
    seen: HashSet<(String, i64)>,
    cancel: CancellationToken,
    subscription: Option<Box<dyn Subscription>>,
    policy: UnrecognizedPolicy,
    close_timeout: Duration,
    sequence: u64,
    finished: bool,
}

impl EventSequence {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next event. `None` once cancelled; a broken subscription yields one
    /// `Error::Stream` and then `None`.
    pub async fn next(&mut self) -> Option<Result<RelayedEvent>> {
        if self.finished {
            return None;
        }

        loop {
            let delivery = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("[{}] Session cancelled", self.session_id);
                    self.shutdown().await;
                    return None;
                }
                delivery = self.rx.recv() => delivery,
            };

            match delivery {
                Some(Delivery::Message(message)) => {
                    if let Some(event) = self.admit(message) {
                        return Some(Ok(event));
                    }
                }
                Some(Delivery::Failed(reason)) => {
                    warn!("[{}] Subscription failed: {}", self.session_id, reason);
                    self.shutdown().await;
                    return Some(Err(Error::Stream(reason)));
                }
                None => {
                    warn!("[{}] Subscription ended unexpectedly", self.session_id);
                    self.shutdown().await;
                    return Some(Err(Error::Stream(
                        "broker subscription closed".to_string(),
                    )));
                }
            }
        }
    }

    fn admit(&mut self, message: RawMessage) -> Option<RelayedEvent> {
        if !self.seen.insert(message.identity()) {
            debug!(
                "[{}] Dropping redelivered {}@{}",
                self.session_id, message.topic, message.offset
            );
            return None;
        }

        let event = classify_message(&message);
        if event.is_unrecognized() && self.policy == UnrecognizedPolicy::Suppress {
            debug!(
                "[{}] Suppressing unrecognized {}@{}",
                self.session_id, message.topic, message.offset
            );
            return None;
        }

        let changes = match &event {
            CdcEvent::DataChange(change) => change.diff(),
            _ => Vec::new(),
        };

        self.sequence += 1;
        Some(RelayedEvent {
            resume_id: format!("{}-{}", self.sequence, message.offset),
            sequence: self.sequence,
            topic: message.topic,
            partition: message.partition,
            offset: message.offset,
            timestamp_ms: message.timestamp_ms,
            event,
            changes,
        })
    }

    async fn shutdown(&mut self) {
        self.finished = true;
        self.cancel.cancel();
        self.rx.close();
        self.seen = HashSet::new();

        if let Some(subscription) = self.subscription.take() {
            match tokio::time::timeout(self.close_timeout, subscription.close()).await {
                Ok(Ok(())) => debug!("[{}] Subscription released", self.session_id),
                Ok(Err(e)) => warn!("[{}] Failed to close subscription: {}", self.session_id, e),
                Err(_) => warn!(
                    "[{}] Subscription close exceeded {:?}",
                    self.session_id, self.close_timeout
                ),
            }
        }
    }

    /// Adapt into a `Stream` for transports
    pub fn into_stream(self) -> impl Stream<Item = Result<RelayedEvent>> + Send + 'static {
        futures::stream::unfold(self, |mut sequence| async move {
            sequence.next().await.map(|item| (item, sequence))
        })
    }
}

impl Drop for EventSequence {
    fn drop(&mut self) {
        // Broker clients watch the token, so a dropped session still releases
        // its subscription.
        self.cancel.cancel();
    }
}
