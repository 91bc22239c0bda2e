//! Credentials file loading.
//!
//! The station refuses to start without its credentials file, before any
//! connection to the broker or the store is attempted. The file is TOML:
//!
//! ```toml
//! [mqtt]
//! username = "station"
//! password = "secret"
//! ```

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Contents of the credentials file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    /// Broker login, absent for anonymous brokers
    #[serde(default)]
    pub mqtt: Option<MqttCredentials>,
}

/// Broker username and password
#[derive(Clone, Deserialize)]
pub struct MqttCredentials {
    /// Broker username
    pub username: String,
    /// Broker password
    pub password: String,
}

impl std::fmt::Debug for MqttCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Loads the credentials file.
///
/// # Errors
/// Returns [`Error::CredentialsMissing`] when the file does not exist and
/// [`Error::Config`] when it cannot be read or parsed.
pub fn load_credentials<P: AsRef<Path>>(path: P) -> Result<Credentials> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::CredentialsMissing {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("Failed to read credentials file: {e}"),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse credentials file: {e}"),
    })
}
