//! Configuration for skein.
//!
//! Settings come from a TOML file with environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, CompilerSettings, LoggingSettings, ModelSettings, Settings, SettingsError,
    CONFIG_ENV_VAR,
};
