//! Configuration loading for the lander CLI

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};

use lander_rl::EngineConfig;

/// Configuration for the CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub training: TrainingConfig,
    pub storage: StorageConfig,
    /// File the configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Replay workers; 0 means one per available core.
    pub workers: usize,
    pub passes: usize,
    /// Base seed for episode RNGs; unset draws from entropy.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            passes: 1,
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Definitions file; the stock lander definition is used when unset.
    pub definitions: Option<PathBuf>,
    pub tables_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            definitions: None,
            tables_dir: PathBuf::from("tables"),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_file(),
        };
        Self::build(path, Environment::with_prefix("LANDER"))
    }

    fn build(path: Option<PathBuf>, environment: Environment) -> Result<Self> {
        let mut builder = ConfigBuilder::<config::builder::DefaultState>::default();

        if let Some(path) = &path {
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        // LANDER__SECTION__KEY
        builder = builder.add_source(environment.separator("__").try_parsing(true));

        let mut config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.source = path;
        Ok(config)
    }

    /// Find the configuration file
    fn find_config_file() -> Option<PathBuf> {
        // Check in order: LANDER_CONFIG env, ./lander.toml, ~/.config/lander/lander.toml
        if let Ok(path) = std::env::var("LANDER_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let local = PathBuf::from("lander.toml");
        if local.exists() {
            return Some(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".config").join("lander").join("lander.toml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }

    /// Stored table file of a definition.
    pub fn table_path(&self, name: &str) -> PathBuf {
        self.storage.tables_dir.join(format!("{name}.table.json"))
    }
}
