/// Integration tests for orchestrator components
///
/// These tests verify:
/// - Settings seeding (empty store, persisted settings win, invalid seed rejected)
/// - Component wiring against a real database file
use anyhow::Result;
use proxyup::store::memory::MemoryStore;
use proxyup::{ProxyAddress, ProxyResource, ResourceStore, Settings};
use tempfile::tempdir;

use super::{Components, load_or_seed_settings};
use crate::config::Config;
use crate::pool::open_pool;

#[tokio::test]
async fn empty_store_is_seeded_from_config() -> Result<()> {
    let store = MemoryStore::new();
    let seed = Settings { liveness_interval_minutes: 3, ..Settings::default() };

    let settings = load_or_seed_settings(&store, seed.clone()).await?;
    assert_eq!(settings, seed);
    assert_eq!(store.load_settings().await?, Some(seed));
    Ok(())
}

#[tokio::test]
async fn persisted_settings_win_over_config() -> Result<()> {
    let store = MemoryStore::new();
    let persisted = Settings { stuck_threshold_hours: 6, ..Settings::default() };
    store.save_settings(&persisted).await?;

    let seed = Settings { stuck_threshold_hours: 48, ..Settings::default() };
    let settings = load_or_seed_settings(&store, seed).await?;
    assert_eq!(settings.stuck_threshold_hours, 6);
    Ok(())
}

#[tokio::test]
async fn invalid_seed_is_not_persisted() -> Result<()> {
    let store = MemoryStore::new();
    let seed = Settings { timeout_seconds: 0, ..Settings::default() };

    assert!(load_or_seed_settings(&store, seed).await.is_err());
    assert!(store.load_settings().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn components_build_against_fresh_database() -> Result<()> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("service.db");
    let pool = open_pool(&db_path.to_string_lossy()).await?;

    let mut config = Config::default();
    config.settings.low_speed_threshold_mbps = 25.0;

    let components = Components::build(&config, pool).await?;
    assert_eq!(components.settings.snapshot().await.low_speed_threshold_mbps, 25.0);

    let resource = ProxyResource::new(ProxyAddress::new("192.0.2.10", 8080));
    components.store.create_resource(&resource).await?;
    assert_eq!(components.store.list_resources().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn missing_isp_database_is_fatal() -> Result<()> {
    let temp_dir = tempdir()?;
    let pool = open_pool(&temp_dir.path().join("service.db").to_string_lossy()).await?;

    let mut config = Config::default();
    config.geoip.isp_database =
        Some(temp_dir.path().join("missing.mmdb").to_string_lossy().into_owned());

    assert!(Components::build(&config, pool).await.is_err());
    Ok(())
}
