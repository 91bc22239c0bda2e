/// Store connection and table creation
pub mod database;

/// Credentials file loading
pub mod credentials;

/// Application settings from `ecosense.toml` and the environment
pub mod settings;

pub use credentials::{Credentials, MqttCredentials, load_credentials};
pub use settings::{
    DashboardSettings, MqttSettings, RelaySettings, Settings, StoreSettings, TopicSettings,
    load_app_configuration,
};
