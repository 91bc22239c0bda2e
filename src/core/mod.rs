//! Core business logic - framework-agnostic reading, threshold and history operations.

/// Historical windows and export
pub mod history;
/// Sensor kinds, payload decoding and reading storage
pub mod reading;
/// Threshold document and alert evaluation
pub mod thresholds;

pub use reading::SensorKind;
pub use thresholds::{Breach, DocumentRef, Thresholds};
