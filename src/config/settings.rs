//! TOML-based configuration for skein.
//!
//! Example configuration:
//! ```toml
//! [logging]
//! filter = "skein=debug"
//!
//! [compiler]
//! plan_cache = true
//!
//! [model]
//! path = "${MODELS_DIR}/shop.toml"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SKEIN_CONFIG";

const LOCAL_CONFIG: &str = "skein.toml";

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unterminated variable reference in '{0}'")]
    UnterminatedVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub compiler: CompilerSettings,
    pub model: ModelSettings,
}

/// Logging configuration, consumed by the binary's subscriber.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Compiler configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Cache compiled plans per model revision.
    pub plan_cache: bool,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self { plan_cache: true }
    }
}

/// Model document location.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Default model document (supports ${ENV_VAR} expansion).
    pub path: Option<String>,
}

impl ModelSettings {
    /// The model path with environment variables expanded.
    pub fn resolved_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from the default locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `SKEIN_CONFIG`
    /// 2. `./skein.toml`
    ///
    /// Falls back to defaults when neither exists.
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        Ok(Settings::default())
    }

    /// Load an explicit file when given, otherwise search the default
    /// locations.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::load(),
        }
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax. A lone `$` is kept.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (var_name, remainder) = if let Some(braced) = after.strip_prefix('{') {
            let end = braced
                .find('}')
                .ok_or_else(|| SettingsError::UnterminatedVar(s.to_string()))?;
            (&braced[..end], &braced[end + 1..])
        } else {
            let end = after
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
                .unwrap_or(after.len());
            (&after[..end], &after[end..])
        };

        if var_name.is_empty() {
            result.push('$');
        } else {
            let value = env::var(var_name)
                .map_err(|_| SettingsError::MissingEnvVar(var_name.to_string()))?;
            result.push_str(&value);
        }
        rest = remainder;
    }

    result.push_str(rest);
    Ok(result)
}
