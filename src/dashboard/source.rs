//! Where the dashboard's refresh tick reads from.
//!
//! One dashboard, two data sources: the live feed of readings the ingest bridge
//! stored in this process, or the store itself.

use crate::{
    core::{SensorKind, reading},
    entities::reading as reading_entity,
    errors::Result,
};
use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;

/// Upper bound on readings drained from the live feed in one tick
pub const MAX_DRAIN_PER_TICK: usize = 512;

/// The dashboard's data source.
#[derive(Debug)]
pub enum DataSource {
    /// Readings forwarded by an in-process ingest bridge
    Live(mpsc::Receiver<reading_entity::Model>),
    /// The two newest readings per kind, queried on every tick
    Store {
        /// Collection holding the readings
        collection: String,
    },
}

/// What one tick fetched.
#[derive(Debug, Default)]
pub struct TickBatch {
    /// Live readings in arrival order
    pub arrived: Vec<(SensorKind, reading_entity::Model)>,
    /// Store snapshots: the newest readings of one kind, newest first
    pub latest: Vec<(SensorKind, Vec<reading_entity::Model>)>,
}

impl DataSource {
    /// Short name shown on the dashboard.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Live(_) => "live broker feed",
            Self::Store { .. } => "store",
        }
    }

    /// Fetches whatever is new. Never blocks on the live feed.
    pub async fn fetch(&mut self, db: &DatabaseConnection) -> Result<TickBatch> {
        let mut batch = TickBatch::default();
        match self {
            Self::Live(feed) => {
                while batch.arrived.len() < MAX_DRAIN_PER_TICK {
                    let Ok(model) = feed.try_recv() else {
                        break;
                    };
                    // rows written by this process always carry a known label
                    if let Ok(kind) = model.kind.parse::<SensorKind>() {
                        batch.arrived.push((kind, model));
                    }
                }
            }
            Self::Store { collection } => {
                for kind in SensorKind::ALL {
                    let newest = reading::latest_readings(db, collection, kind, 2).await?;
                    batch.latest.push((kind, newest));
                }
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_store_source_returns_two_newest_per_kind() -> Result<()> {
        let db = setup_test_db().await?;
        for value in [20.0, 21.0, 22.0] {
            insert_test_reading(&db, SensorKind::Temperature, value).await?;
        }

        let mut source = DataSource::Store {
            collection: TEST_COLLECTION.to_string(),
        };
        let batch = source.fetch(&db).await?;

        assert!(batch.arrived.is_empty());
        let (kind, temps) = &batch.latest[0];
        assert_eq!(*kind, SensorKind::Temperature);
        assert_eq!(temps.len(), 2);
        assert_eq!(temps[0].value, 22.0);
        assert!(batch.latest[1].1.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_live_source_drains_without_blocking() -> Result<()> {
        let db = setup_test_db().await?;
        let (tx, rx) = mpsc::channel(8);
        let first = insert_test_reading(&db, SensorKind::Humidity, 50.0).await?;
        let second = insert_test_reading(&db, SensorKind::Temperature, 19.0).await?;
        tx.try_send(first).ok();
        tx.try_send(second).ok();

        let mut source = DataSource::Live(rx);
        let batch = source.fetch(&db).await?;
        assert_eq!(batch.arrived.len(), 2);
        assert_eq!(batch.arrived[0].0, SensorKind::Humidity);

        // empty feed returns immediately
        let batch = source.fetch(&db).await?;
        assert!(batch.arrived.is_empty());
        Ok(())
    }
}
