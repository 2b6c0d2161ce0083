//! Configuration manager - main API for config operations

use crate::persistence::ConfigPersistence;
use crate::{Config, ConfigError, ConfigResult};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Main configuration manager
///
/// Resolves file locations, loads with fallback to defaults, and saves
/// atomically.
pub struct ConfigManager {
    persistence: ConfigPersistence,
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Creates a config manager using the platform config directory
    ///
    /// - Linux: `~/.config/storystream/`
    /// - macOS: `~/Library/Application Support/storystream/`
    /// - Windows: `%APPDATA%\storystream\`
    pub fn new() -> ConfigResult<Self> {
        let config_dir = Self::project_dirs()?.config_dir().to_path_buf();
        Self::with_directory(config_dir)
    }

    /// Creates a config manager with a custom config directory
    pub fn with_directory(config_dir: PathBuf) -> ConfigResult<Self> {
        let persistence = ConfigPersistence::new(config_dir.join(CONFIG_FILE_NAME));

        Ok(Self {
            persistence,
            config_dir,
        })
    }

    fn project_dirs() -> ConfigResult<ProjectDirs> {
        ProjectDirs::from("", "", "storystream").ok_or_else(|| ConfigError::PathResolutionError {
            reason: "Could not determine user home directory".to_string(),
        })
    }

    /// Platform data directory used when `app.data_dir` is unset
    pub fn default_data_dir() -> ConfigResult<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().join("sync"))
    }

    /// Resolves where the sync engine keeps its queue and history files
    pub fn data_dir(&self, config: &Config) -> ConfigResult<PathBuf> {
        match &config.app.data_dir {
            Some(dir) if dir.is_absolute() => Ok(dir.clone()),
            Some(dir) => Ok(self.config_dir.join(dir)),
            None => Self::default_data_dir(),
        }
    }

    /// Returns the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Returns the full config file path
    pub fn config_path(&self) -> PathBuf {
        self.persistence.path().to_path_buf()
    }

    /// Loads the configuration from file
    pub fn load(&self) -> ConfigResult<Config> {
        self.persistence.load()
    }

    /// Loads the configuration, falling back to defaults on any error
    pub fn load_or_default(&self) -> Config {
        match self.load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config: {}, using defaults", e);
                Config::default()
            }
        }
    }

    /// Saves the configuration to file
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        self.persistence.save(config)
    }

    /// Loads, applies `update_fn`, and saves the result
    pub fn update<F>(&self, update_fn: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.load()?;
        update_fn(&mut config);
        self.save(&config)
    }

    /// Writes a default config file if one doesn't exist
    ///
    /// Returns Ok(true) if a new file was created.
    pub fn initialize(&self) -> ConfigResult<bool> {
        if self.config_path().exists() {
            log::info!(
                "Config file already exists at {}",
                self.config_path().display()
            );
            return Ok(false);
        }

        self.save(&Config::default())?;
        Ok(true)
    }

    /// Applies `STORYSTREAM_*` environment overrides on top of the file config
    ///
    /// Recognised variables: `STORYSTREAM_DATA_DIR`,
    /// `STORYSTREAM_PRIMARY_SERVER_URL`, `STORYSTREAM_PRIMARY_API_TOKEN`,
    /// `STORYSTREAM_SECONDARY_ENABLED`, `STORYSTREAM_SECONDARY_STORE_URL`.
    pub fn load_with_env_overrides(&self) -> Config {
        let mut config = self.load_or_default();
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());

        if let Err(errors) = config.validate() {
            log::warn!(
                "Config validation warnings after env overrides: {:?}",
                errors
            );
        }

        config
    }
}

fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup("STORYSTREAM_DATA_DIR") {
        config.app.data_dir = Some(PathBuf::from(dir));
    }

    if let Some(url) = lookup("STORYSTREAM_PRIMARY_SERVER_URL") {
        config.primary.server_url = url;
    }

    if let Some(token) = lookup("STORYSTREAM_PRIMARY_API_TOKEN") {
        config.primary.api_token = Some(token);
    }

    if let Some(enabled) = lookup("STORYSTREAM_SECONDARY_ENABLED") {
        match enabled.parse::<bool>() {
            Ok(value) => config.secondary.enabled = value,
            Err(_) => log::warn!("Ignoring STORYSTREAM_SECONDARY_ENABLED={}", enabled),
        }
    }

    if let Some(url) = lookup("STORYSTREAM_SECONDARY_STORE_URL") {
        config.secondary.store_url = url;
    }
}
