//! Telemetry ingest bridge.
//!
//! Drains the inbound broker queue and appends one reading per valid message.
//! Each message is independent: a malformed payload or a failed write loses
//! that message only, and nothing is retried.

use crate::{
    broker::InboundMessage,
    config::TopicSettings,
    core::reading::{self, SensorKind},
    entities::reading as reading_entity,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A reading was written
    Stored(reading_entity::Model),
    /// The message was dropped before reaching the store
    Discarded {
        /// Why it was dropped
        reason: String,
    },
    /// The store rejected the write; the message is lost
    Failed {
        /// Store error
        reason: String,
    },
}

/// Maps topics to sensor kinds.
#[derive(Debug, Clone)]
pub struct TopicMap {
    temperature: String,
    humidity: String,
}

impl TopicMap {
    /// Builds the map from the configured sensor topics.
    #[must_use]
    pub fn from_settings(topics: &TopicSettings) -> Self {
        Self {
            temperature: topics.temperature.clone(),
            humidity: topics.humidity.clone(),
        }
    }

    /// The kind implied by `topic`, if it is one of the sensor topics.
    #[must_use]
    pub fn kind_for(&self, topic: &str) -> Option<SensorKind> {
        if topic == self.temperature {
            Some(SensorKind::Temperature)
        } else if topic == self.humidity {
            Some(SensorKind::Humidity)
        } else {
            None
        }
    }

    /// Both sensor topics, for subscribing.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        vec![self.temperature.clone(), self.humidity.clone()]
    }
}

/// The ingest bridge.
pub struct IngestBridge {
    db: DatabaseConnection,
    collection: String,
    topics: TopicMap,
    live_feed: Option<mpsc::Sender<reading_entity::Model>>,
}

impl IngestBridge {
    /// Creates a bridge writing into `collection`.
    #[must_use]
    pub fn new(db: DatabaseConnection, collection: impl Into<String>, topics: TopicMap) -> Self {
        Self {
            db,
            collection: collection.into(),
            topics,
            live_feed: None,
        }
    }

    /// Forwards every stored reading to `feed` as well. Forwarding never blocks:
    /// when the feed is full the reading is only in the store.
    #[must_use]
    pub fn with_live_feed(mut self, feed: mpsc::Sender<reading_entity::Model>) -> Self {
        self.live_feed = Some(feed);
        self
    }

    /// Processes one message. Never returns an error to the caller.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> IngestOutcome {
        let Some(kind) = self.topics.kind_for(topic) else {
            debug!("Ignoring message on unexpected topic {topic}");
            return IngestOutcome::Discarded {
                reason: format!("unexpected topic {topic}"),
            };
        };

        let value = match reading::decode_payload(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Discarding {kind} message: {e}");
                return IngestOutcome::Discarded {
                    reason: e.to_string(),
                };
            }
        };

        info!("Received {kind}: {value}{}", kind.unit());

        match reading::insert_reading(&self.db, &self.collection, kind, value, Utc::now()).await {
            Ok(stored) => {
                if let Some(feed) = &self.live_feed {
                    if feed.try_send(stored.clone()).is_err() {
                        debug!("Live feed full or closed, reading {} not forwarded", stored.id);
                    }
                }
                IngestOutcome::Stored(stored)
            }
            Err(e) => {
                error!("Failed to store {kind} reading {value}: {e}");
                IngestOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Consumes `inbound` until it closes or `shutdown` flips to `true`.
    #[instrument(skip_all, fields(collection = %self.collection))]
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Ingest bridge started");
        loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else {
                        info!("Inbound queue closed");
                        break;
                    };
                    self.handle_message(&message.topic, &message.payload).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Ingest bridge stopped");
    }
}
