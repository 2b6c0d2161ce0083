// FILE: crates/cli/src/app.rs

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use storystream_config::{Config, ConfigManager};
use storystream_network::{CloudStoreBackend, LibraryServerBackend};
use storystream_sync_engine::{EngineConfig, SyncEngine};

/// Resolved settings the commands run against
pub struct App {
    pub manager: ConfigManager,
    pub config: Config,
    pub data_dir: PathBuf,
}

impl App {
    /// Loads config (file plus `STORYSTREAM_*` overrides) and resolves the data directory
    pub fn load(config_dir: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let manager = match config_dir {
            Some(dir) => ConfigManager::with_directory(dir),
            None => ConfigManager::new(),
        }
        .context("Failed to locate configuration directory")?;

        let config = manager.load_with_env_overrides();
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => manager
                .data_dir(&config)
                .context("Failed to resolve data directory")?,
        };

        Ok(Self {
            manager,
            config,
            data_dir,
        })
    }

    /// Builds the engine with whichever backends are enabled, then probes them once
    pub async fn engine(&self) -> Result<Arc<SyncEngine>> {
        let engine = build_engine(&self.config, self.data_dir.clone())?;
        engine.refresh_connectivity().await;
        Ok(Arc::new(engine))
    }
}

pub fn build_engine(config: &Config, data_dir: PathBuf) -> Result<SyncEngine> {
    let timeout = config.sync.backend_timeout();
    let device = config.app.device_name.clone();
    let mut engine = SyncEngine::new(EngineConfig::from_config(config, data_dir));

    if config.primary.enabled {
        let backend = LibraryServerBackend::from_config(&config.primary, timeout, device.clone())
            .context("Invalid primary backend configuration")?;
        engine = engine.with_primary(Arc::new(backend));
    }

    if config.secondary.enabled {
        let backend = CloudStoreBackend::from_config(&config.secondary, timeout, device)
            .context("Invalid secondary backend configuration")?;
        engine = engine.with_secondary(Arc::new(backend));
    }

    Ok(engine)
}
