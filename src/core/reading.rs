//! Reading business logic - sensor kinds, payload decoding and reading storage.
//!
//! Readings are append-only. All functions are async where they touch the store
//! and return `Result` types for error handling.

use crate::{
    entities::{Reading, reading},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two quantities the station measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Air temperature in °C
    Temperature,
    /// Relative humidity in %
    Humidity,
}

impl SensorKind {
    /// Both kinds, in display order.
    pub const ALL: [Self; 2] = [Self::Temperature, Self::Humidity];

    /// Label persisted in the `kind` column. These are the labels the device
    /// firmware and historical CSV files already use.
    #[must_use]
    pub const fn storage_label(self) -> &'static str {
        match self {
            Self::Temperature => "temperatura",
            Self::Humidity => "umidade",
        }
    }

    /// Short lowercase English name used in URLs and exports.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
        }
    }

    /// Unit shown next to values.
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for SensorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temperatura" | "temperature" | "temp" => Ok(Self::Temperature),
            "umidade" | "humidity" | "hum" | "umid" => Ok(Self::Humidity),
            other => Err(Error::UnknownSensorKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// Decodes a sensor payload: UTF-8 text holding one finite decimal number.
///
/// Surrounding whitespace is ignored. Byte sequences that are not UTF-8
/// (e.g. corrupted serial frames), non-numeric text and `NaN`/infinite
/// values are rejected.
pub fn decode_payload(payload: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(payload).map_err(|e| Error::InvalidPayload {
        message: format!("not UTF-8: {e}"),
    })?;

    let value: f64 = text.trim().parse().map_err(|_| Error::InvalidPayload {
        message: format!("not a number: {:?}", text.trim()),
    })?;

    if !value.is_finite() {
        return Err(Error::InvalidPayload {
            message: format!("not finite: {value}"),
        });
    }

    Ok(value)
}

/// Builds an unsaved reading row.
#[must_use]
pub fn new_reading(
    collection: &str,
    kind: SensorKind,
    value: f64,
    timestamp: DateTime<Utc>,
) -> reading::ActiveModel {
    reading::ActiveModel {
        collection: Set(collection.to_string()),
        kind: Set(kind.storage_label().to_string()),
        value: Set(value),
        timestamp: Set(timestamp),
        ..Default::default()
    }
}

/// Appends one reading to `collection`.
pub async fn insert_reading<C>(
    db: &C,
    collection: &str,
    kind: SensorKind,
    value: f64,
    timestamp: DateTime<Utc>,
) -> Result<reading::Model>
where
    C: ConnectionTrait,
{
    new_reading(collection, kind, value, timestamp)
        .insert(db)
        .await
        .map_err(Into::into)
}

/// Returns up to `limit` readings of `kind`, newest first.
pub async fn latest_readings<C>(
    db: &C,
    collection: &str,
    kind: SensorKind,
    limit: u64,
) -> Result<Vec<reading::Model>>
where
    C: ConnectionTrait,
{
    Reading::find()
        .filter(reading::Column::Collection.eq(collection))
        .filter(reading::Column::Kind.eq(kind.storage_label()))
        .order_by_desc(reading::Column::Timestamp)
        .order_by_desc(reading::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Counts the readings of `kind` in `collection`.
pub async fn count_readings<C>(db: &C, collection: &str, kind: SensorKind) -> Result<u64>
where
    C: ConnectionTrait,
{
    Reading::find()
        .filter(reading::Column::Collection.eq(collection))
        .filter(reading::Column::Kind.eq(kind.storage_label()))
        .count(db)
        .await
        .map_err(Into::into)
}
