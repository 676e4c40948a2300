//! Configuration module for the evbus runtime.
//!
//! Settings are loaded with figment from defaults, TOML/YAML files and
//! `EVBUS_*` environment variables, then checked with [`validate_config`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ConsumerSettings, EvbusConfig, ExecutorSettings, LogFormat, LogLevel, LogOutput,
    LoggingConfig, SpanEventConfig,
};
pub use validation::validate_config;
