//! Config relay.
//!
//! Watches the threshold document and republishes it to the device on every
//! change. The store has no change feed, so the watch is a poll on the
//! document's `revision`, woken early by the dashboard write path. Publishing
//! is fire-and-forget: the device never acknowledges.

use crate::{
    broker::Publisher,
    core::thresholds::{self, DocumentRef, Thresholds},
    errors::Result,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tracing::{error, info, instrument, warn};

/// Publishes threshold changes to the configuration topic.
pub struct ConfigRelay<P> {
    db: DatabaseConnection,
    doc: DocumentRef,
    publisher: P,
    topic: String,
    retain: bool,
    last_revision: Option<i64>,
}

impl<P: Publisher> ConfigRelay<P> {
    /// Creates a relay for `doc`, publishing to `topic`.
    pub fn new(
        db: DatabaseConnection,
        doc: DocumentRef,
        publisher: P,
        topic: impl Into<String>,
        retain: bool,
    ) -> Self {
        Self {
            db,
            doc,
            publisher,
            topic: topic.into(),
            retain,
            last_revision: None,
        }
    }

    /// Creates the threshold document with defaults if it does not exist yet.
    pub async fn bootstrap(&self) -> Result<()> {
        let (_, created) = thresholds::ensure_thresholds(&self.db, &self.doc).await?;
        if created {
            warn!("Threshold document did not exist, defaults written");
        }
        Ok(())
    }

    /// Checks the document once and publishes it if its revision changed.
    /// The first successful read always counts as a change.
    ///
    /// Returns the published payload, if any. A failed publish is logged and
    /// not retried until the next change.
    pub async fn poll_once(&mut self) -> Result<Option<String>> {
        let Some(document) = thresholds::get_thresholds(&self.db, &self.doc).await? else {
            return Ok(None);
        };

        if self.last_revision == Some(document.revision) {
            return Ok(None);
        }
        self.last_revision = Some(document.revision);

        let payload = Thresholds::from(&document).to_payload()?;
        info!("Threshold change detected (revision {})", document.revision);

        match self
            .publisher
            .publish(&self.topic, payload.clone(), self.retain)
            .await
        {
            Ok(()) => {
                info!("Thresholds sent to {}: {payload}", self.topic);
            }
            Err(e) => {
                error!("Failed to publish thresholds: {e}");
            }
        }
        Ok(Some(payload))
    }

    /// Watches until `shutdown` flips to `true`. Wakes every `poll_interval`
    /// and whenever `changed` is notified.
    #[instrument(skip_all, fields(doc = %self.doc.doc_id))]
    pub async fn run(
        mut self,
        poll_interval: Duration,
        changed: Arc<Notify>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Config relay watching {}/{}", self.doc.collection, self.doc.doc_id);
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = changed.notified() => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.poll_once().await {
                error!("Config relay poll failed: {e}");
            }
        }
        info!("Config relay stopped");
    }
}
