//! Shared test utilities.
//!
//! Helpers for setting up an in-memory store and creating readings with
//! sensible defaults.

use crate::{
    core::{DocumentRef, SensorKind, reading},
    entities,
    errors::Result,
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;

/// Collection used by every test that writes readings
pub const TEST_COLLECTION: &str = "test_readings";

/// Creates an in-memory `SQLite` database with all tables initialized.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// The threshold document used by tests.
pub fn test_document() -> DocumentRef {
    DocumentRef::new("test_config", "limites_alerta")
}

/// Inserts a reading stamped now into [`TEST_COLLECTION`].
pub async fn insert_test_reading(
    db: &DatabaseConnection,
    kind: SensorKind,
    value: f64,
) -> Result<entities::reading::Model> {
    reading::insert_reading(db, TEST_COLLECTION, kind, value, Utc::now()).await
}

/// Inserts a reading with an explicit timestamp into [`TEST_COLLECTION`].
pub async fn insert_test_reading_at(
    db: &DatabaseConnection,
    kind: SensorKind,
    value: f64,
    timestamp: DateTime<Utc>,
) -> Result<entities::reading::Model> {
    reading::insert_reading(db, TEST_COLLECTION, kind, value, timestamp).await
}
