//! Reading entity - one sensor sample.
//!
//! Readings are append-only: created by the ingest bridge or the CSV importer,
//! never updated or deleted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Reading database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "readings")]
pub struct Model {
    /// Unique identifier for the reading
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Logical collection the reading belongs to (e.g. `"estacao_dados"`)
    pub collection: String,
    /// Storage label of the sensor kind (`"temperatura"` or `"umidade"`)
    pub kind: String,
    /// Measured value
    pub value: f64,
    /// When the value was measured (server time for live readings)
    pub timestamp: DateTimeUtc,
}

/// Readings have no relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
