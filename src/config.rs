//! Migration settings
//!
//! [`MigrateConfig::load`] reads the `[migrate]` section of
//! `config/config.toml` when present, overlaid with `SCHEMAGUARD__MIGRATE__*`
//! environment variables, e.g. `SCHEMAGUARD__MIGRATE__DATABASE_URL`.

use crate::migration::{SchemaLayout, VersionRoutines};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "config/config.toml";
const ENV_PREFIX: &str = "SCHEMAGUARD";
const SECTION: &str = "migrate";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// PostgreSQL connection string
    pub database_url: Option<String>,
    /// Schema root holding the version descriptor
    pub source: PathBuf,
    pub layout: SchemaLayout,
    pub routines: VersionRoutines,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            source: PathBuf::from("schema"),
            layout: SchemaLayout::default(),
            routines: VersionRoutines::default(),
        }
    }
}

impl MigrateConfig {
    /// Load from `config/config.toml` (optional) and the environment
    ///
    /// An unreadable file is reported and the environment alone is used.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the `[migrate]` section exists but does not
    /// deserialize.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(env_source());

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if Path::new(DEFAULT_CONFIG_FILE).exists() {
                    log::warn!("Failed to load config file, falling back to env: {err}");
                }
                Config::builder().add_source(env_source()).build().map_err(|env_err| {
                    ConfigError::Message(format!(
                        "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                    ))
                })?
            }
        };

        Self::from_settings(&settings)
    }

    /// Load from a specific file, overlaid with the environment
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unparsable, or its
    /// `[migrate]` section does not deserialize.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(env_source())
            .build()?;
        Self::from_settings(&settings)
    }

    fn from_settings(settings: &Config) -> Result<Self, ConfigError> {
        match settings.get::<MigrateConfig>(SECTION) {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(ConfigError::Message(format!(
                "Migration configuration could not be loaded from file or environment: {e}"
            ))),
        }
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__")
}
