//! Alert-threshold business logic.
//!
//! The threshold document is a singleton per `(collection, doc_id)`. It is
//! overwritten wholesale by every write. Limits must be finite, but their
//! order is not checked: a minimum above its maximum is stored as given. Alert evaluation is a pure runtime comparison
//! and nothing about it is persisted.

use crate::{
    core::reading::SensorKind,
    entities::{ThresholdConfig, threshold_config},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Set, TransactionTrait, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Address of the threshold document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// Collection holding the document
    pub collection: String,
    /// Document id within the collection
    pub doc_id: String,
}

impl DocumentRef {
    /// Builds a document reference.
    pub fn new(collection: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            doc_id: doc_id.into(),
        }
    }
}

/// The four alert limits, serialized with the field names the device expects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Upper temperature limit
    #[serde(default = "default_temp_max")]
    pub temp_max: f64,
    /// Lower temperature limit
    #[serde(default = "default_temp_min")]
    pub temp_min: f64,
    /// Upper humidity limit
    #[serde(rename = "umid_max", default = "default_humid_max")]
    pub humid_max: f64,
    /// Lower humidity limit
    #[serde(rename = "umid_min", default = "default_humid_min")]
    pub humid_min: f64,
}

const fn default_temp_max() -> f64 {
    30.0
}
const fn default_temp_min() -> f64 {
    15.0
}
const fn default_humid_max() -> f64 {
    80.0
}
const fn default_humid_min() -> f64 {
    30.0
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temp_max: default_temp_max(),
            temp_min: default_temp_min(),
            humid_max: default_humid_max(),
            humid_min: default_humid_min(),
        }
    }
}

/// Which side of a limit a value fell on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "side", rename_all = "lowercase")]
pub enum Breach {
    /// Value strictly above the maximum
    Above {
        /// The exceeded maximum
        limit: f64,
    },
    /// Value strictly below the minimum
    Below {
        /// The undercut minimum
        limit: f64,
    },
}

impl Thresholds {
    /// Returns `(min, max)` for `kind`.
    #[must_use]
    pub const fn limits_for(&self, kind: SensorKind) -> (f64, f64) {
        match kind {
            SensorKind::Temperature => (self.temp_min, self.temp_max),
            SensorKind::Humidity => (self.humid_min, self.humid_max),
        }
    }

    /// Compares `value` against the limits for `kind`. Values equal to a limit
    /// are within range.
    #[must_use]
    pub fn evaluate(&self, kind: SensorKind, value: f64) -> Option<Breach> {
        let (min, max) = self.limits_for(kind);
        if value > max {
            Some(Breach::Above { limit: max })
        } else if value < min {
            Some(Breach::Below { limit: min })
        } else {
            None
        }
    }

    /// Rejects limits that are not finite numbers. Ordering is not checked:
    /// a minimum above its maximum is accepted.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("temp_max", self.temp_max),
            ("temp_min", self.temp_min),
            ("umid_max", self.humid_max),
            ("umid_min", self.humid_min),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(Error::Config {
                    message: format!("{name} must be a finite number, got {value}"),
                });
            }
        }
        Ok(())
    }

    /// Flat JSON object published on the configuration topic.
    ///
    /// Fails for non-finite limits, which JSON would encode as `null`.
    pub fn to_payload(&self) -> Result<String> {
        self.validate()?;
        serde_json::to_string(self).map_err(Into::into)
    }
}

impl From<&threshold_config::Model> for Thresholds {
    fn from(model: &threshold_config::Model) -> Self {
        Self {
            temp_max: model.temp_max,
            temp_min: model.temp_min,
            humid_max: model.umid_max,
            humid_min: model.umid_min,
        }
    }
}

/// Reads the threshold document, `None` when it was never written.
pub async fn get_thresholds<C>(db: &C, doc: &DocumentRef) -> Result<Option<threshold_config::Model>>
where
    C: ConnectionTrait,
{
    ThresholdConfig::find_by_id((doc.collection.clone(), doc.doc_id.clone()))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Overwrites the threshold document (creating it if needed) and bumps its revision.
///
/// There is no conflict detection: concurrent writers race and the last write wins.
/// Non-finite limits are rejected before anything is written.
pub async fn save_thresholds(
    db: &DatabaseConnection,
    doc: &DocumentRef,
    thresholds: &Thresholds,
) -> Result<threshold_config::Model> {
    thresholds.validate()?;
    let txn = db.begin().await?;

    let existing = get_thresholds(&txn, doc).await?;
    let now = Utc::now();

    let saved = match existing {
        Some(current) => {
            let revision = current.revision + 1;
            let mut active: threshold_config::ActiveModel = current.into();
            active.temp_max = Set(thresholds.temp_max);
            active.temp_min = Set(thresholds.temp_min);
            active.umid_max = Set(thresholds.humid_max);
            active.umid_min = Set(thresholds.humid_min);
            active.revision = Set(revision);
            active.updated_at = Set(now);
            active.update(&txn).await?
        }
        None => {
            threshold_config::ActiveModel {
                collection: Set(doc.collection.clone()),
                doc_id: Set(doc.doc_id.clone()),
                temp_max: Set(thresholds.temp_max),
                temp_min: Set(thresholds.temp_min),
                umid_max: Set(thresholds.humid_max),
                umid_min: Set(thresholds.humid_min),
                revision: Set(1),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?
        }
    };

    txn.commit().await?;
    Ok(saved)
}

/// Creates the threshold document with the defaults when it does not exist.
///
/// Returns the document and whether it had to be created.
pub async fn ensure_thresholds(
    db: &DatabaseConnection,
    doc: &DocumentRef,
) -> Result<(threshold_config::Model, bool)> {
    if let Some(existing) = get_thresholds(db, doc).await? {
        return Ok((existing, false));
    }

    info!(
        "Threshold document {}/{} missing, creating defaults",
        doc.collection, doc.doc_id
    );
    let created = save_thresholds(db, doc, &Thresholds::default()).await?;
    Ok((created, true))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_payload_uses_device_field_names() {
        let payload = Thresholds {
            temp_max: 28.0,
            temp_min: 18.0,
            humid_max: 70.0,
            humid_min: 30.0,
        }
        .to_payload()
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 4);
        assert_eq!(object["temp_max"], 28.0);
        assert_eq!(object["temp_min"], 18.0);
        assert_eq!(object["umid_max"], 70.0);
        assert_eq!(object["umid_min"], 30.0);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let thresholds: Thresholds = serde_json::from_str(r#"{"temp_max": 35}"#).unwrap();
        assert_eq!(thresholds.temp_max, 35.0);
        assert_eq!(thresholds.temp_min, 15.0);
        assert_eq!(thresholds.humid_max, 80.0);
        assert_eq!(thresholds.humid_min, 30.0);
    }

    #[test]
    fn test_evaluate_limits() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.evaluate(SensorKind::Temperature, 22.0), None);
        assert_eq!(thresholds.evaluate(SensorKind::Temperature, 30.0), None);
        assert_eq!(
            thresholds.evaluate(SensorKind::Temperature, 31.5),
            Some(Breach::Above { limit: 30.0 })
        );
        assert_eq!(
            thresholds.evaluate(SensorKind::Humidity, 12.0),
            Some(Breach::Below { limit: 30.0 })
        );
    }

    #[tokio::test]
    async fn test_bootstrap_creates_defaults_on_empty_store() -> Result<()> {
        let db = setup_test_db().await?;
        let doc = test_document();

        assert!(get_thresholds(&db, &doc).await?.is_none());

        let (created, was_created) = ensure_thresholds(&db, &doc).await?;
        assert!(was_created);
        assert_eq!(created.temp_max, 30.0);
        assert_eq!(created.temp_min, 15.0);
        assert_eq!(created.umid_max, 80.0);
        assert_eq!(created.umid_min, 30.0);
        assert_eq!(created.revision, 1);

        let (again, was_created) = ensure_thresholds(&db, &doc).await?;
        assert!(!was_created);
        assert_eq!(again, created);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_overwrites_and_bumps_revision() -> Result<()> {
        let db = setup_test_db().await?;
        let doc = test_document();
        ensure_thresholds(&db, &doc).await?;

        // min above max is accepted as-is
        let odd = Thresholds {
            temp_max: 10.0,
            temp_min: 20.0,
            humid_max: 50.0,
            humid_min: 40.0,
        };
        let saved = save_thresholds(&db, &doc, &odd).await?;
        assert_eq!(saved.revision, 2);
        assert_eq!(Thresholds::from(&saved), odd);

        let stored = get_thresholds(&db, &doc).await?.unwrap();
        assert_eq!(Thresholds::from(&stored), odd);
        Ok(())
    }

    #[tokio::test]
    async fn test_documents_are_scoped_by_collection() -> Result<()> {
        let db = setup_test_db().await?;
        let doc = test_document();
        let other = DocumentRef::new("lab_config", doc.doc_id.clone());

        ensure_thresholds(&db, &doc).await?;
        assert!(get_thresholds(&db, &other).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_non_finite_limits_are_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        let doc = test_document();
        ensure_thresholds(&db, &doc).await?;

        for bad in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let thresholds = Thresholds {
                temp_max: bad,
                ..Thresholds::default()
            };
            assert!(matches!(thresholds.to_payload(), Err(Error::Config { .. })));
            assert!(matches!(
                save_thresholds(&db, &doc, &thresholds).await,
                Err(Error::Config { .. })
            ));
        }

        // stored document untouched
        let stored = get_thresholds(&db, &doc).await?.unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.temp_max, 30.0);
        Ok(())
    }
}
