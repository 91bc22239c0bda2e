//! Dashboard - read path, write path and the web surface.
//!
//! A single configurable component replaces the per-variant dashboards: the
//! data source (live broker feed or store) is chosen at construction. A tick
//! loop refreshes the display state on a fixed interval; HTTP handlers only read
//! that state or trigger explicit actions.

/// HTML rendering
pub mod render;
/// HTTP routes
pub mod server;
/// Data source selection
pub mod source;
/// In-memory display state
pub mod state;

pub use source::DataSource;
pub use state::DisplayState;

use crate::{
    broker::BrokerHandle,
    config::{DashboardSettings, settings::REFRESH_BOUNDS},
    core::{
        DocumentRef, SensorKind, Thresholds,
        history::{self, HistoryPoint},
        thresholds,
    },
    entities::threshold_config,
    errors::Result,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock, watch};
use tracing::{error, info, instrument, warn};

/// Shared dashboard controller.
pub struct Dashboard {
    db: DatabaseConnection,
    settings: DashboardSettings,
    data_collection: String,
    config_doc: DocumentRef,
    source: Mutex<DataSource>,
    broker: Option<BrokerHandle>,
    relay_wakeup: Arc<Notify>,
    state: RwLock<DisplayState>,
}

impl Dashboard {
    /// Creates a dashboard reading from `source`.
    ///
    /// `broker` is the live connection, when there is one, so its status can be
    /// shown and reset. `relay_wakeup` is notified after every threshold write.
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        settings: DashboardSettings,
        data_collection: impl Into<String>,
        config_doc: DocumentRef,
        source: DataSource,
        broker: Option<BrokerHandle>,
        relay_wakeup: Arc<Notify>,
    ) -> Self {
        // an explicit history load must fit in the chart buffers
        let load_limit = usize::try_from(settings.history_load_limit).unwrap_or(usize::MAX);
        let mut state = DisplayState::new(
            settings.history_capacity.max(load_limit),
            settings.alert_capacity,
            settings.refresh_secs,
        );
        state.connection = broker.as_ref().map(|b| b.status().borrow().clone());
        info!("Dashboard reading from {}", source.label());

        Self {
            db,
            settings,
            data_collection: data_collection.into(),
            config_doc,
            source: Mutex::new(source),
            broker,
            relay_wakeup,
            state: RwLock::new(state),
        }
    }

    /// Copy of the current display state.
    pub async fn snapshot(&self) -> DisplayState {
        self.state.read().await.clone()
    }

    /// Label of the configured data source.
    pub async fn source_label(&self) -> &'static str {
        self.source.lock().await.label()
    }

    /// Runs one refresh: fetch, update state, record any error in the state.
    pub async fn tick(&self) {
        let fetched = {
            let mut source = self.source.lock().await;
            source.fetch(&self.db).await
        };
        let connection = self.broker.as_ref().map(|b| b.status().borrow().clone());

        let mut state = self.state.write().await;
        state.connection = connection;
        match fetched {
            Ok(batch) => {
                for (kind, model) in batch.arrived {
                    state.record(kind, model.value, model.timestamp);
                }
                for (kind, newest) in &batch.latest {
                    state.apply_latest(*kind, newest);
                }
                state.last_error = None;
            }
            Err(e) => {
                error!("Dashboard refresh failed: {e}");
                state.last_error = Some(format!("Refresh failed: {e}"));
            }
        }
        state.last_tick = Some(Utc::now());
    }

    /// Refreshes on the configured interval until `shutdown` flips to `true`.
    /// The interval is re-read after every tick so changes apply immediately.
    #[instrument(skip_all)]
    pub async fn run_ticks(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let (paused, secs) = {
                let state = self.state.read().await;
                (state.paused, state.refresh_secs)
            };
            if !paused {
                self.tick().await;
            }

            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(secs)) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Dashboard ticks stopped");
    }

    /// Loads the heavy history window for both kinds (explicit user action only).
    pub async fn load_history(&self) -> Result<()> {
        let limit = self.settings.history_load_limit;
        let mut windows = Vec::with_capacity(SensorKind::ALL.len());
        for kind in SensorKind::ALL {
            windows.push((
                kind,
                history::load_window(&self.db, &self.data_collection, kind, limit).await?,
            ));
        }

        let mut state = self.state.write().await;
        for (kind, window) in &windows {
            state.load_history(*kind, window);
        }
        state.last_history_load = Some(Utc::now());
        state.notice = Some("History reloaded".to_string());
        Ok(())
    }

    /// Points currently charted for `kind`, for export.
    pub async fn export_points(&self, kind: SensorKind) -> Vec<HistoryPoint> {
        self.state.read().await.export_points(kind)
    }

    /// Overwrites the stored thresholds (last write wins) and wakes the relay.
    pub async fn save_thresholds(&self, new: &Thresholds) -> Result<threshold_config::Model> {
        let saved = thresholds::save_thresholds(&self.db, &self.config_doc, new).await?;
        self.relay_wakeup.notify_one();
        info!("Thresholds saved (revision {})", saved.revision);

        let mut state = self.state.write().await;
        state.notice = Some("Thresholds saved".to_string());
        Ok(saved)
    }

    /// Stored thresholds, or the defaults when the document does not exist.
    pub async fn stored_thresholds(&self) -> Result<Thresholds> {
        Ok(thresholds::get_thresholds(&self.db, &self.config_doc)
            .await?
            .as_ref()
            .map(Thresholds::from)
            .unwrap_or_default())
    }

    /// Copies the stored thresholds into the locally held alert limits.
    /// Returns `false` (and leaves the limits alone) when no document exists.
    pub async fn load_limits(&self) -> Result<bool> {
        let stored = thresholds::get_thresholds(&self.db, &self.config_doc).await?;
        let mut state = self.state.write().await;
        if let Some(document) = stored {
            state.limits = Thresholds::from(&document);
            state.notice = Some("Alert limits loaded from the store".to_string());
            Ok(true)
        } else {
            warn!("No threshold document to load limits from");
            state.notice = Some("No threshold document found".to_string());
            Ok(false)
        }
    }

    /// Sets the locally held alert limits without touching the store.
    pub async fn set_limits(&self, limits: Thresholds) {
        let mut state = self.state.write().await;
        state.limits = limits;
        state.notice = Some("Local alert limits updated".to_string());
    }

    /// Tears down and reopens the broker connection. Returns `false` when this
    /// dashboard has no broker connection.
    pub async fn reset_connection(&self) -> bool {
        let Some(broker) = &self.broker else {
            self.state.write().await.notice = Some("No broker connection to reset".to_string());
            return false;
        };
        broker.reset().await;
        let mut state = self.state.write().await;
        state.connection = Some(broker.status().borrow().clone());
        state.notice = Some("Broker connection reset".to_string());
        true
    }

    /// Pauses or resumes ticking; returns the new paused flag.
    pub async fn toggle_paused(&self) -> bool {
        let mut state = self.state.write().await;
        state.paused = !state.paused;
        state.paused
    }

    /// Changes the tick interval, clamped to the accepted range.
    pub async fn set_refresh_secs(&self, secs: u64) -> u64 {
        let (min, max) = REFRESH_BOUNDS;
        let secs = secs.clamp(min, max);
        self.state.write().await.refresh_secs = secs;
        secs
    }

    /// Records a failed user action so the page can show it.
    pub async fn report_error(&self, message: String) {
        self.state.write().await.last_error = Some(message);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;
    use tokio::sync::mpsc;

    fn store_dashboard(db: DatabaseConnection, wakeup: Arc<Notify>) -> Dashboard {
        Dashboard::new(
            db,
            DashboardSettings::default(),
            TEST_COLLECTION,
            test_document(),
            DataSource::Store {
                collection: TEST_COLLECTION.to_string(),
            },
            None,
            wakeup,
        )
    }

    #[tokio::test]
    async fn test_tick_from_store_computes_delta() -> Result<()> {
        let db = setup_test_db().await?;
        let dashboard = store_dashboard(db.clone(), Arc::new(Notify::new()));

        insert_test_reading(&db, SensorKind::Temperature, 22.0).await?;
        dashboard.tick().await;
        let state = dashboard.snapshot().await;
        assert_eq!(state.temperature.metric.unwrap().delta, 0.0);
        assert!(state.humidity.metric.is_none());
        assert!(state.last_tick.is_some());

        insert_test_reading(&db, SensorKind::Temperature, 24.5).await?;
        dashboard.tick().await;
        let metric = dashboard.snapshot().await.temperature.metric.unwrap();
        assert_eq!(metric.value, 24.5);
        assert_eq!(metric.delta, 2.5);
        Ok(())
    }

    #[tokio::test]
    async fn test_tick_error_is_surfaced_and_next_tick_retries() -> Result<()> {
        let db = setup_test_db().await?;
        let dashboard = store_dashboard(db.clone(), Arc::new(Notify::new()));
        db.close().await?;

        dashboard.tick().await;
        let state = dashboard.snapshot().await;
        assert!(state.last_error.unwrap().starts_with("Refresh failed"));
        assert!(state.last_tick.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_live_tick_drains_feed() -> Result<()> {
        let db = setup_test_db().await?;
        let (tx, rx) = mpsc::channel(8);
        let dashboard = Dashboard::new(
            db.clone(),
            DashboardSettings::default(),
            TEST_COLLECTION,
            test_document(),
            DataSource::Live(rx),
            None,
            Arc::new(Notify::new()),
        );

        tx.try_send(insert_test_reading(&db, SensorKind::Humidity, 60.0).await?)
            .unwrap();
        tx.try_send(insert_test_reading(&db, SensorKind::Humidity, 57.0).await?)
            .unwrap();
        dashboard.tick().await;

        let humidity = dashboard.snapshot().await.humidity;
        assert_eq!(humidity.metric.unwrap().delta, -3.0);
        assert_eq!(humidity.history.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_thresholds_wakes_relay() -> Result<()> {
        let db = setup_test_db().await?;
        let wakeup = Arc::new(Notify::new());
        let dashboard = store_dashboard(db, Arc::clone(&wakeup));

        let new = Thresholds {
            temp_max: 28.0,
            temp_min: 18.0,
            humid_max: 70.0,
            humid_min: 30.0,
        };
        let first = dashboard.save_thresholds(&new).await?;
        let second = dashboard.save_thresholds(&new).await?;
        assert_eq!(first.revision, 1);
        assert_eq!(second.revision, 2);

        // a permit was stored for the relay
        tokio::time::timeout(Duration::from_millis(100), wakeup.notified())
            .await
            .unwrap();
        assert_eq!(dashboard.stored_thresholds().await?, new);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_limits_and_history() -> Result<()> {
        let db = setup_test_db().await?;
        let dashboard = store_dashboard(db.clone(), Arc::new(Notify::new()));

        assert!(!dashboard.load_limits().await?);
        assert_eq!(dashboard.stored_thresholds().await?, Thresholds::default());

        let custom = Thresholds {
            temp_max: 26.0,
            ..Thresholds::default()
        };
        thresholds::save_thresholds(&db, &test_document(), &custom).await?;
        assert!(dashboard.load_limits().await?);
        assert_eq!(dashboard.snapshot().await.limits, custom);

        for value in 0..5 {
            insert_test_reading(&db, SensorKind::Temperature, f64::from(value)).await?;
        }
        dashboard.load_history().await?;
        let state = dashboard.snapshot().await;
        assert_eq!(state.temperature.history.len(), 5);
        assert!(state.last_history_load.is_some());
        assert_eq!(dashboard.export_points(SensorKind::Temperature).await.len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_history_load_keeps_every_loaded_point() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = DashboardSettings {
            history_capacity: 3,
            history_load_limit: 6,
            ..DashboardSettings::default()
        };
        let dashboard = Dashboard::new(
            db.clone(),
            settings,
            TEST_COLLECTION,
            test_document(),
            DataSource::Store {
                collection: TEST_COLLECTION.to_string(),
            },
            None,
            Arc::new(Notify::new()),
        );

        for value in 0..8 {
            insert_test_reading(&db, SensorKind::Humidity, f64::from(value)).await?;
        }
        dashboard.load_history().await?;

        let exported = dashboard.export_points(SensorKind::Humidity).await;
        assert_eq!(exported.len(), 6);
        assert_eq!(exported[0].value, 2.0);
        assert_eq!(exported[5].value, 7.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_controls() -> Result<()> {
        let db = setup_test_db().await?;
        let dashboard = store_dashboard(db, Arc::new(Notify::new()));

        assert!(dashboard.toggle_paused().await);
        assert!(!dashboard.toggle_paused().await);
        assert_eq!(dashboard.set_refresh_secs(0).await, 1);
        assert_eq!(dashboard.set_refresh_secs(30).await, 30);
        assert_eq!(dashboard.set_refresh_secs(3600).await, 60);
        assert!(!dashboard.reset_connection().await);
        Ok(())
    }
}
