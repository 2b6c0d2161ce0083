//! Integration tests for the configuration system

use std::fs;
use storystream_config::{Config, ConfigManager, ConfigSection, SyncConfig, CONFIG_VERSION};
use tempfile::TempDir;

fn setup_test_manager() -> Result<(TempDir, ConfigManager), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp_dir = TempDir::new()?;
    let manager = ConfigManager::with_directory(temp_dir.path().to_path_buf())?;
    Ok((temp_dir, manager))
}

#[test]
fn test_full_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, manager) = setup_test_manager()?;

    assert!(manager.initialize()?);

    let config = manager.load()?;
    assert_eq!(config.version, CONFIG_VERSION);

    let mut modified = config.clone();
    modified.secondary.enabled = true;
    modified.secondary.namespace = "reader-42".to_string();
    modified.sync.history_limit_per_book = 250;
    manager.save(&modified)?;

    let reloaded = manager.load()?;
    assert!(reloaded.secondary.enabled);
    assert_eq!(reloaded.secondary.namespace, "reader-42");
    assert_eq!(reloaded.sync.history_limit_per_book, 250);

    Ok(())
}

#[test]
fn test_invalid_config_never_written() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, manager) = setup_test_manager()?;
    manager.save(&Config::default())?;

    let mut invalid = Config::default();
    invalid.secondary.enabled = true;
    invalid.secondary.store_url = "not a url".to_string();
    assert!(manager.save(&invalid).is_err());

    assert_eq!(manager.load()?, Config::default());
    Ok(())
}

#[test]
fn test_corrupted_config_uses_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, manager) = setup_test_manager()?;
    fs::write(manager.config_path(), "this is not valid TOML {{{")?;

    assert!(manager.load().is_err());
    assert_eq!(manager.load_or_default(), Config::default());
    Ok(())
}

#[test]
fn test_out_of_range_values_load_with_warning() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, manager) = setup_test_manager()?;
    fs::write(manager.config_path(), "[sync]\nbackend_timeout_secs = 0\n")?;

    let config = manager.load()?;
    assert_eq!(config.sync.backend_timeout_secs, 0);
    assert!(config.validate().is_err());
    Ok(())
}

#[test]
fn test_serialization_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let toml_string = toml::to_string(&config)?;
    let deserialized: Config = toml::from_str(&toml_string)?;
    assert_eq!(config, deserialized);
    Ok(())
}

#[test]
fn test_sync_section_defaults() {
    let section = SyncConfig::default();
    assert_eq!(section.section_name(), "sync");
    assert!(section.validate().is_ok());
    assert!(section.dedupe_enabled);
}
