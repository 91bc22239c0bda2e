//! Unified error type for the telemetry station.

use thiserror::Error;

/// Every failure the bridge, relay, dashboard and importer can surface.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// The credentials file is required at startup and was not found
    #[error("Credentials file not found: {path}")]
    CredentialsMissing {
        /// Path that was checked
        path: String,
    },

    /// Store failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// A sensor payload that is not a finite decimal number
    #[error("Invalid payload: {message}")]
    InvalidPayload {
        /// Why the payload was rejected
        message: String,
    },

    /// A sensor kind label that is neither temperature nor humidity
    #[error("Unknown sensor kind: {kind}")]
    UnknownSensorKind {
        /// The rejected label
        kind: String,
    },

    /// MQTT client or connection failure
    #[error("Broker error: {message}")]
    Broker {
        /// Broker-side description
        message: String,
    },

    /// HTTP listener failure
    #[error("Server error: {message}")]
    Server {
        /// Listener-side description
        message: String,
    },

    /// CSV read or write failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem or terminal failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ClientError> for Error {
    fn from(value: rumqttc::ClientError) -> Self {
        Self::Broker {
            message: value.to_string(),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
