pub use self::parser::{
    BridgeConfig, Config, DatabaseConfig, GhostsConfig, InstagramConfig, LoggingConfig,
    MetricsConfig, RegistrationConfig, RelayConfig, RoomConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
