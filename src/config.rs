//! Runtime settings, read from an optional TOML file and `DICTS__*`
//! environment variables (for example `DICTS__ENGINES__DEFAULT=mongo`).

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{DictError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "dictengine.toml";
pub const POSTGRES: &str = "postgres";
pub const MONGO: &str = "mongo";

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    pub available: BTreeSet<String>,
    /// Engine owning dict metadata and the migration history.
    pub default: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// SQLite file, or `:memory:`.
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationSettings {
    pub path: PathBuf,
    /// Target of the scripts found directly in `path`.
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engines: EngineSettings,
    pub storage: StorageSettings,
    pub migrations: MigrationSettings,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engines: EngineSettings {
                available: [POSTGRES, MONGO].iter().map(|s| s.to_string()).collect(),
                default: POSTGRES.to_string(),
            },
            storage: StorageSettings { database: ":memory:".to_string() },
            migrations: MigrationSettings { path: PathBuf::from("migrations"), target: "dicts".to_string() },
            log: LogSettings { filter: "info".to_string() },
        }
    }
}

impl Settings {
    /// Layers the file (if present) and the environment over the defaults.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let defaults = Settings::default();
        let available: Vec<String> = defaults.engines.available.iter().cloned().collect();
        let built = config::Config::builder()
            .set_default("engines.available", available)?
            .set_default("engines.default", defaults.engines.default)?
            .set_default("storage.database", defaults.storage.database)?
            .set_default("migrations.path", defaults.migrations.path.to_string_lossy().to_string())?
            .set_default("migrations.target", defaults.migrations.target)?
            .set_default("log.filter", defaults.log.filter)?
            .add_source(config::File::with_name(file.unwrap_or(DEFAULT_CONFIG_FILE)).required(file.is_some()))
            .add_source(
                config::Environment::with_prefix("DICTS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("engines.available")
                    .try_parsing(true),
            )
            .build()?;
        let settings: Settings = built.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.engines.available.contains(&self.engines.default) {
            return Err(DictError::Config(format!(
                "Default engine '{}' is not among the available engines {:?}",
                self.engines.default, self.engines.available
            )));
        }
        if self.migrations.target.trim().is_empty() {
            return Err(DictError::Config("Migration target must not be empty".to_string()));
        }
        Ok(())
    }
}
