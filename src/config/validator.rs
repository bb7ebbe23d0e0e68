use thiserror::Error;

use super::Config;

/// Upper bound for `relay.expiration_grace_secs`, one year.
pub const MAX_EXPIRATION_GRACE_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.domain.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "bridge.domain cannot be empty".to_string(),
            ));
        }

        if self.bridge.homeserver_url.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "bridge.homeserver_url cannot be empty".to_string(),
            ));
        }

        if self.bridge.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "bridge.port must be between 1 and 65535".to_string(),
            ));
        }

        if !self.bridge.user_prefix.starts_with('_') {
            return Err(ConfigError::InvalidConfig(
                "bridge.user_prefix must start with '_'".to_string(),
            ));
        }

        if self.registration.appservice_token.is_empty()
            || self.registration.homeserver_token.is_empty()
        {
            return Err(ConfigError::InvalidConfig(
                "registration tokens cannot be empty".to_string(),
            ));
        }

        if self.database.sqlite_path().is_none() {
            return Err(ConfigError::InvalidConfig(
                "database must point at a sqlite file".to_string(),
            ));
        }

        if !(0..=MAX_EXPIRATION_GRACE_SECS).contains(&self.relay.expiration_grace_secs) {
            return Err(ConfigError::InvalidConfig(format!(
                "relay.expiration_grace_secs must be between 0 and {}",
                MAX_EXPIRATION_GRACE_SECS
            )));
        }

        if self.relay.event_queue_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "relay.event_queue_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
