//! Application settings.
//!
//! Settings come from three layers, lowest priority first:
//! 1. built-in defaults (the values the station has always shipped with),
//! 2. an optional TOML file (`ECOSENSE_CONFIG`, default `ecosense.toml`),
//! 3. environment variables, usually provided through `.env`.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Default location of the settings file
pub const DEFAULT_CONFIG_PATH: &str = "ecosense.toml";

/// Root settings structure representing the whole `ecosense.toml` file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Broker connection
    pub mqtt: MqttSettings,
    /// Topic names
    pub topics: TopicSettings,
    /// Store location and collection names
    pub store: StoreSettings,
    /// Dashboard server and display state
    pub dashboard: DashboardSettings,
    /// Config relay behaviour
    pub relay: RelaySettings,
    /// Path of the credentials file that must exist at startup
    pub credentials_path: String,
}

/// Broker connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    /// Broker host name
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Client id presented to the broker
    pub client_id: String,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// Capacity of the inbound message queue
    pub queue_capacity: usize,
}

/// Topic names shared with the device firmware
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    /// Incoming temperature readings
    pub temperature: String,
    /// Incoming humidity readings
    pub humidity: String,
    /// Outgoing threshold configuration
    pub config: String,
}

/// Store settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// `SeaORM` connection URL
    pub database_url: String,
    /// Collection receiving readings
    pub data_collection: String,
    /// Collection holding the threshold document
    pub config_collection: String,
    /// Id of the threshold document
    pub config_doc_id: String,
}

/// Dashboard settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    /// Socket address the HTTP server binds to
    pub bind_addr: String,
    /// Seconds between refresh ticks
    pub refresh_secs: u64,
    /// Capacity of each per-kind history ring buffer; the dashboard raises it to
    /// `history_load_limit` so a history load is kept whole
    pub history_capacity: usize,
    /// Records per kind fetched by an explicit history load
    pub history_load_limit: u64,
    /// Maximum number of alert messages kept
    pub alert_capacity: usize,
}

/// Config relay settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Publish thresholds with the broker's retained flag
    pub retain: bool,
    /// Seconds between document polls
    pub poll_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mqtt: MqttSettings::default(),
            topics: TopicSettings::default(),
            store: StoreSettings::default(),
            dashboard: DashboardSettings::default(),
            relay: RelaySettings::default(),
            credentials_path: "credentials.toml".to_string(),
        }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            client_id: "ecosense-bridge".to_string(),
            keep_alive_secs: 60,
            queue_capacity: 64,
        }
    }
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            temperature: "esp32/sensor/temperatura".to_string(),
            humidity: "esp32/sensor/umidade".to_string(),
            config: "esp32/config/limites".to_string(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/ecosense.sqlite?mode=rwc".to_string(),
            data_collection: "estacao_dados".to_string(),
            config_collection: "estacao_config".to_string(),
            config_doc_id: "limites_alerta".to_string(),
        }
    }
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8501".to_string(),
            refresh_secs: 15,
            history_capacity: 100,
            history_load_limit: 200,
            alert_capacity: 50,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            retain: false,
            poll_secs: 5,
        }
    }
}

/// Shortest and longest refresh interval the dashboard accepts, in seconds
pub const REFRESH_BOUNDS: (u64, u64) = (1, 60);

impl Settings {
    /// Parses settings from TOML text. Missing sections and fields keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config {
            message: format!("Failed to parse settings: {e}"),
        })
    }

    /// Overrides fields from environment-style variables.
    ///
    /// `lookup` returns the value of a variable, or `None` when unset. Unparseable
    /// numeric values are rejected instead of silently ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_string(&lookup, "MQTT_BROKER", &mut self.mqtt.host);
        override_parsed(&lookup, "MQTT_PORT", &mut self.mqtt.port)?;
        override_string(&lookup, "MQTT_CLIENT_ID", &mut self.mqtt.client_id);
        override_string(&lookup, "TOPIC_TEMP", &mut self.topics.temperature);
        override_string(&lookup, "TOPIC_HUM", &mut self.topics.humidity);
        override_string(&lookup, "TOPIC_CONFIG", &mut self.topics.config);
        override_string(&lookup, "DATABASE_URL", &mut self.store.database_url);
        override_string(&lookup, "COLLECTION_DATA", &mut self.store.data_collection);
        override_string(&lookup, "COLLECTION_CONFIG", &mut self.store.config_collection);
        override_string(&lookup, "DOC_CONFIG", &mut self.store.config_doc_id);
        override_string(&lookup, "DASHBOARD_ADDR", &mut self.dashboard.bind_addr);
        override_parsed(&lookup, "REFRESH_SECS", &mut self.dashboard.refresh_secs)?;
        override_parsed(&lookup, "HISTORY_CAPACITY", &mut self.dashboard.history_capacity)?;
        override_parsed(&lookup, "RELAY_RETAIN", &mut self.relay.retain)?;
        override_string(&lookup, "ECOSENSE_CREDENTIALS", &mut self.credentials_path);
        Ok(())
    }

    /// Clamps values that would make the loops misbehave.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let (min, max) = REFRESH_BOUNDS;
        self.dashboard.refresh_secs = self.dashboard.refresh_secs.clamp(min, max);
        self.dashboard.history_capacity = self.dashboard.history_capacity.max(1);
        self.dashboard.alert_capacity = self.dashboard.alert_capacity.max(1);
        self.mqtt.queue_capacity = self.mqtt.queue_capacity.max(1);
        self.relay.poll_secs = self.relay.poll_secs.max(1);
        self
    }
}

fn override_string<F>(lookup: &F, key: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
        debug!("{key} overrides settings file");
        *target = value.trim().to_string();
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
        *target = value.trim().parse().map_err(|e| Error::Config {
            message: format!("Invalid value for {key} ({value}): {e}"),
        })?;
    }
    Ok(())
}

/// Loads settings from a TOML file.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read settings file: {e}"),
    })?;
    Settings::from_toml_str(&contents)
}

/// Builds the application settings: file (when present), then environment overrides.
pub fn load_app_configuration() -> Result<Settings> {
    let path = std::env::var("ECOSENSE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());

    let mut settings = if Path::new(&path).exists() {
        let settings = load_settings(&path)?;
        info!("Loaded settings from {path}");
        settings
    } else {
        warn!("No settings file at {path}, using built-in defaults");
        Settings::default()
    };

    settings.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(settings.normalized())
}
