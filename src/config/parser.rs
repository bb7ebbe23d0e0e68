use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub instagram: InstagramConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub room: RoomConfig,
    #[serde(default)]
    pub ghosts: GhostsConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    pub domain: String,
    pub homeserver_url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_user_prefix")]
    pub user_prefix: String,
    #[serde(default = "default_bot_localpart")]
    pub bot_localpart: String,
    #[serde(default)]
    pub bot_display_name: Option<String>,
    #[serde(default)]
    pub bot_avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrationConfig {
    #[serde(default = "default_bridge_id")]
    pub bridge_id: String,
    #[serde(alias = "as_token")]
    pub appservice_token: String,
    #[serde(alias = "hs_token")]
    pub homeserver_token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstagramConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub auth_base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            auth_base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> Option<String> {
        let url = self.connection_string();
        if url.is_empty() || url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return None;
        }
        Some(url.strip_prefix("sqlite://").unwrap_or(&url).to_string())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoomConfig {
    #[serde(default = "default_room_name_pattern")]
    pub name_pattern: String,
    #[serde(default = "default_room_topic_pattern")]
    pub topic_pattern: String,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            name_pattern: default_room_name_pattern(),
            topic_pattern: default_room_topic_pattern(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GhostsConfig {
    #[serde(default = "default_displayname_pattern")]
    pub displayname_pattern: String,
}

impl Default for GhostsConfig {
    fn default() -> Self {
        Self {
            displayname_pattern: default_displayname_pattern(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_expiration_grace_secs")]
    pub expiration_grace_secs: i64,
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            expiration_grace_secs: default_expiration_grace_secs(),
            event_queue_size: default_event_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_from_file("config.yaml"),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn bot_user_id(&self) -> String {
        format!("@{}:{}", self.bridge.bot_localpart, self.bridge.domain)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("APPSERVICE_INSTAGRAM_AS_TOKEN") {
            self.registration.appservice_token = value;
        }
        if let Ok(value) = std::env::var("APPSERVICE_INSTAGRAM_HS_TOKEN") {
            self.registration.homeserver_token = value;
        }
    }
}

fn default_port() -> u16 {
    9006
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_user_prefix() -> String {
    "_ig_".to_string()
}

fn default_bot_localpart() -> String {
    "_ig_".to_string()
}

fn default_bridge_id() -> String {
    "instagram".to_string()
}

fn default_api_base_url() -> String {
    "https://graph.instagram.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_room_name_pattern() -> String {
    "[Instagram] :name".to_string()
}

fn default_room_topic_pattern() -> String {
    ":handle".to_string()
}

fn default_displayname_pattern() -> String {
    ":name (Instagram)".to_string()
}

fn default_expiration_grace_secs() -> i64 {
    24 * 60 * 60
}

fn default_event_queue_size() -> usize {
    256
}
