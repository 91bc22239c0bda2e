//! Entity module - SeaORM entity definitions for the telemetry store.
//! A document-store "collection" is a `collection` column here,
//! so collection names stay configurable at runtime.

pub mod reading;
pub mod threshold_config;

pub use reading::{Column as ReadingColumn, Entity as Reading, Model as ReadingModel};
pub use threshold_config::{
    Column as ThresholdConfigColumn, Entity as ThresholdConfig, Model as ThresholdConfigModel,
};
