//! Threshold config entity - the singleton alert-limit document.
//!
//! The document is overwritten wholesale on every write. `revision` grows by one
//! on each write so watchers can detect changes without a change feed.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Threshold document model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "threshold_configs")]
pub struct Model {
    /// Logical collection holding the document (e.g. `"estacao_config"`)
    #[sea_orm(primary_key, auto_increment = false)]
    pub collection: String,
    /// Fixed document id within the collection (e.g. `"limites_alerta"`)
    #[sea_orm(primary_key, auto_increment = false)]
    pub doc_id: String,
    /// Upper temperature limit
    pub temp_max: f64,
    /// Lower temperature limit
    pub temp_min: f64,
    /// Upper humidity limit
    pub umid_max: f64,
    /// Lower humidity limit
    pub umid_min: f64,
    /// Write counter, starts at 1
    pub revision: i64,
    /// When the document was last written
    pub updated_at: DateTimeUtc,
}

/// `ThresholdConfig` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
