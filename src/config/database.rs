//! Store configuration module.
//!
//! Handles the `SeaORM` connection and table creation. Tables are generated from
//! the entity definitions with `Schema::create_table_from_entity`, so the schema
//! always matches the Rust structs without hand-written SQL.

use crate::entities::{Reading, ThresholdConfig};
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::debug;

/// Creates the parent directory of a file-backed `SQLite` URL so that
/// `?mode=rwc` can create the database file itself.
fn ensure_sqlite_parent(database_url: &str) -> Result<()> {
    let Some(rest) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path.contains(":memory:") {
        return Ok(());
    }
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)?,
        _ => {}
    }
    Ok(())
}

/// Opens the store at `database_url` and makes sure every table exists.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    ensure_sqlite_parent(database_url)?;
    let db = Database::connect(database_url).await?;
    create_tables(&db).await?;
    debug!("Store ready at {database_url}");
    Ok(db)
}

fn readings_lookup_index() -> IndexCreateStatement {
    use crate::entities::ReadingColumn;

    Index::create()
        .if_not_exists()
        .name("idx_readings_collection_kind_timestamp")
        .table(Reading)
        .col(ReadingColumn::Collection)
        .col(ReadingColumn::Kind)
        .col(ReadingColumn::Timestamp)
        .to_owned()
}

/// Creates all tables (and the latest-per-kind lookup index) if they do not exist.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut reading_table = schema.create_table_from_entity(Reading);
    reading_table.if_not_exists();
    let mut threshold_table = schema.create_table_from_entity(ThresholdConfig);
    threshold_table.if_not_exists();

    db.execute(builder.build(&reading_table)).await?;
    db.execute(builder.build(&threshold_table)).await?;
    db.execute(builder.build(&readings_lookup_index())).await?;

    Ok(())
}
