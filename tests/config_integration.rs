//! Loading the shipped configuration files.

use reliability_core::config::ConfigManager;
use reliability_core::constants::services;
use reliability_core::resilience::HalfOpenAdmission;
use reliability_core::ReliabilityCoordinator;
use std::path::PathBuf;

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

#[test]
fn test_shipped_base_config_matches_defaults() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "development")
            .unwrap();
    let config = manager.config();

    assert_eq!(manager.environment(), "development");
    assert_eq!(
        config.circuit_breakers.half_open_admission,
        HalfOpenAdmission::Optimistic
    );

    let discord = config.circuit_breakers.config_for_component(services::DISCORD_API);
    assert_eq!(discord.failure_threshold, 5);
    assert_eq!(discord.timeout_seconds, 120);
    assert_eq!(discord.half_open_max_probes, 3);

    let cache = config.circuit_breakers.config_for_component(services::CACHE);
    assert_eq!(cache.failure_threshold, 10);
    assert_eq!(cache.timeout_seconds, 30);

    assert_eq!(config.backup.record_groups.len(), 5);
    assert!(config
        .backup
        .record_groups
        .iter()
        .all(|group| group.scope_column == "guild_id"));
}

#[test]
fn test_test_environment_overrides() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "test").unwrap();
    let config = manager.config();

    assert_eq!(config.retry.base_delay_ms, 10);
    assert!(!config.retry.jitter);
    assert_eq!(config.retry.max_attempts, 3);
    assert!(!config.watchdog.enabled);
    assert!(!config.backup.auto_backup.enabled);
}

#[tokio::test]
async fn test_coordinator_from_loaded_config() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "development")
            .unwrap();
    let coordinator = ReliabilityCoordinator::from_config_manager(&manager);

    let status = coordinator.system_status().await;
    let names: Vec<_> = status
        .circuit_breakers
        .iter()
        .map(|b| b.service_name.as_str())
        .collect();
    assert_eq!(names, vec!["cache", "database", "discord_api", "scheduler"]);
}
