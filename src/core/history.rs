//! Historical window queries and CSV/JSON export.
//!
//! These are the expensive reads: they run only on explicit user action, never
//! on every dashboard tick.

use crate::{
    core::reading::{self, SensorKind},
    entities::reading as reading_entity,
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use serde::Serialize;

/// One exported point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    /// When the value was measured
    pub timestamp: DateTime<Utc>,
    /// Sensor kind (storage label)
    pub kind: String,
    /// Measured value
    pub value: f64,
}

impl From<&reading_entity::Model> for HistoryPoint {
    fn from(model: &reading_entity::Model) -> Self {
        Self {
            timestamp: model.timestamp,
            kind: model.kind.clone(),
            value: model.value,
        }
    }
}

/// Loads the newest `limit` readings of `kind`, returned oldest first so they
/// can be plotted left to right.
pub async fn load_window<C>(
    db: &C,
    collection: &str,
    kind: SensorKind,
    limit: u64,
) -> Result<Vec<HistoryPoint>>
where
    C: ConnectionTrait,
{
    let mut points: Vec<HistoryPoint> = reading::latest_readings(db, collection, kind, limit)
        .await?
        .iter()
        .map(HistoryPoint::from)
        .collect();
    points.reverse();
    Ok(points)
}

/// Renders points as CSV with a `timestamp,kind,value` header.
pub fn to_csv(points: &[HistoryPoint]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["timestamp", "kind", "value"])?;
    for point in points {
        writer.write_record([
            point.timestamp.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            point.kind.clone(),
            point.value.to_string(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
    String::from_utf8(bytes).map_err(|e| Error::Config {
        message: format!("CSV export produced invalid UTF-8: {e}"),
    })
}

/// Renders points as a pretty-printed JSON array.
pub fn to_json(points: &[HistoryPoint]) -> Result<String> {
    serde_json::to_string_pretty(points).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn test_load_window_is_oldest_first() -> Result<()> {
        let db = setup_test_db().await?;
        let start = Utc::now() - Duration::hours(1);
        for i in 0..5 {
            insert_test_reading_at(
                &db,
                SensorKind::Temperature,
                f64::from(i),
                start + Duration::minutes(i64::from(i)),
            )
            .await?;
        }

        let window = load_window(&db, TEST_COLLECTION, SensorKind::Temperature, 3).await?;
        let values: Vec<f64> = window.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_csv_export_shape() {
        let points = vec![HistoryPoint {
            timestamp: Utc.with_ymd_and_hms(2025, 11, 3, 14, 5, 9).unwrap(),
            kind: "temperatura".to_string(),
            value: 24.5,
        }];

        let csv = to_csv(&points).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("timestamp,kind,value"));
        assert_eq!(
            lines.next(),
            Some("2025-11-03 14:05:09.000000,temperatura,24.5")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_json_export_is_array() {
        let json = to_json(&[]).unwrap();
        assert_eq!(json, "[]");
    }
}
