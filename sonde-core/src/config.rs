//! # Configuration Module
//!
//! Handles loading sonde's own settings from `sonde.toml`. The API tree
//! itself lives in a separate YAML or JSON file named by `spec`.
//!
//! ```text
//! +-------------------+     +-------------------+     +-------------------+
//! | SONDE_CONFIG env  | --> | Path resolution   | --> | sonde.toml file   |
//! | (optional)        |     | or default ./     |     | (missing: default)|
//! +-------------------+     +-------------------+     +-------------------+
//!                                                              |
//!                                                              v
//!                           +-------------------+     +-------------------+
//!                           | Redactor          | <-- | Config struct     |
//!                           | [redact] fields   |     | spec, redact      |
//!                           +-------------------+     +-------------------+
//! ```
//!
//! ## Config File Location
//!
//! 1. If `SONDE_CONFIG` environment variable is set, load from that path
//! 2. Otherwise, load from `sonde.toml` in the current directory
//!
//! **Note:** `SONDE_CONFIG` is reserved for the config file path. If sonde
//! detects misuse (e.g., `SONDE_CONFIG=true`), it errors with a helpful
//! message.
//!
//! ## Configuration Structure
//!
//! ```toml
//! spec = "api.yaml"
//!
//! [redact]
//! fields = ["Authorization", "access_token"]
//! ```
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::*;

use crate::{masking::Redactor, Error, Result};

/// Environment variable name for specifying the config file path.
pub const SONDE_CONFIG_ENV: &str = "SONDE_CONFIG";

const DEFAULT_CONFIG: &str = "sonde.toml";
const DEFAULT_SPEC: &str = "api.yaml";

/// sonde's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path of the API tree file.
    pub spec: PathBuf,
    pub redact: Redact,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            spec: PathBuf::from(DEFAULT_SPEC),
            redact: Redact::default(),
        }
    }
}

/// Field names masked in captured responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Redact {
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Config {
    /// Load sonde configuration from path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Config> {
        let buf = match std::fs::read_to_string(path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found, using default configuration", path.display());
                return Ok(Config::default());
            }
            Err(e) => return Err(Error::LoadError(format!("{}: {e}", path.display()))),
        };

        let cfg: Config = toml::from_str(&buf).map_err(|e| {
            Error::LoadError(format!(
                "failed to deserialize {} into sonde::Config: {e}",
                path.display()
            ))
        })?;
        debug!("{} was successfully loaded: {cfg:#?}", path.display());

        Ok(cfg)
    }

    /// Load sonde configuration.
    ///
    /// Loading order:
    /// 1. If `SONDE_CONFIG` env var is set, load from that path
    /// 2. Otherwise, load from `sonde.toml` in the current directory
    pub fn load() -> Result<Config> {
        let path = resolve_path(std::env::var(SONDE_CONFIG_ENV).ok())?;
        Config::load_from(&path)
    }

    pub fn redactor(&self) -> Redactor {
        Redactor::new(&self.redact.fields)
    }
}

/// Config file path from the value of `SONDE_CONFIG`, if set.
///
/// # Errors
///
/// The value does not look like a file path, or names a file that does not
/// exist.
pub fn resolve_path(env_value: Option<String>) -> Result<PathBuf> {
    let Some(value) = env_value else {
        return Ok(PathBuf::from(DEFAULT_CONFIG));
    };
    let path = PathBuf::from(&value);

    // Detect misuse: if it doesn't look like a file path, error out
    if path.extension().is_none_or(|ext| ext != "toml")
        && !value.contains(std::path::MAIN_SEPARATOR)
        && !value.contains('/')
    {
        return Err(Error::LoadError(format!(
            "{SONDE_CONFIG_ENV} should be a path to a config file, not a config value. \
             Got: {value:?}."
        )));
    }

    if !path.exists() {
        return Err(Error::LoadError(format!(
            "Config file specified by {SONDE_CONFIG_ENV} not found: {path:?}"
        )));
    }

    debug!("Loading config from {SONDE_CONFIG_ENV}={path:?}");
    Ok(path)
}
