use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use proxyup::notification::Notifier;
use proxyup::{
    FailureCategory, FailureRecord, HealthStatus, IpObservation, ProbeFields, ProxyAddress,
    ProxyResource, ResourceStore, Settings, SettingsHandle, SpeedSample,
};
use tempfile::{TempDir, tempdir};
use uuid::Uuid;

use super::LibsqlStore;
use crate::pool::{LibsqlManager, LibsqlPool, open_pool};

/// Helper to create test database pool. The directory must outlive the pool.
async fn create_test_database() -> Result<(LibsqlPool, TempDir)> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("test.db");
    let pool = open_pool(&db_path.to_string_lossy()).await?;

    let conn: deadpool::managed::Object<LibsqlManager> = pool.get().await?;
    super::initialize_database(&conn).await?;

    Ok((pool, temp_dir))
}

fn observation(resource_id: Uuid, ip: &str, at: chrono::DateTime<Utc>) -> IpObservation {
    IpObservation {
        id: Uuid::new_v4(),
        resource_id,
        timestamp: at,
        ip: ip.into(),
        previous_ip: None,
        country: "Germany".into(),
        previous_country: String::new(),
        isp: "Example Telecom".into(),
        previous_isp: String::new(),
        stuck: false,
    }
}

#[tokio::test]
async fn migrations_are_idempotent() -> Result<()> {
    let (pool, _dir) = create_test_database().await?;
    let conn = pool.get().await?;

    super::initialize_database(&conn).await?;
    assert_eq!(super::migrations::get_current_version(&conn).await?, 2);
    Ok(())
}

#[tokio::test]
async fn resource_round_trip() -> Result<()> {
    let (pool, _dir) = create_test_database().await?;
    let store = LibsqlStore::new_from_pool(pool);

    let mut resource =
        ProxyResource::new(ProxyAddress::new("10.1.2.3", 3128).with_credentials("alice", "pw"))
            .with_name("Frankfurt 1");
    resource.tag = "eu".into();
    resource.last_check = Some(Utc::now());
    store.create_resource(&resource).await?;

    let loaded = store.get_resource(resource.id).await?.expect("resource exists");
    assert_eq!(loaded.address, resource.address);
    assert_eq!(loaded.name, "Frankfurt 1");
    assert_eq!(loaded.tag, "eu");
    assert_eq!(loaded.status, HealthStatus::Alive);
    assert_eq!(
        loaded.last_check.map(|t| t.timestamp_millis()),
        resource.last_check.map(|t| t.timestamp_millis())
    );

    assert_eq!(store.list_resources().await?.len(), 1);
    assert!(store.delete_resource(resource.id).await?);
    assert!(!store.delete_resource(resource.id).await?);
    assert!(store.get_resource(resource.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn scoped_saves_do_not_clobber_each_other() -> Result<()> {
    let (pool, _dir) = create_test_database().await?;
    let store = LibsqlStore::new_from_pool(pool);

    let resource = ProxyResource::new(ProxyAddress::new("10.1.2.3", 3128));
    store.create_resource(&resource).await?;

    // Two snapshots taken before either batch wrote anything
    let mut liveness = resource.clone();
    let mut throughput = resource.clone();

    liveness.failures = 3;
    liveness.status = HealthStatus::Dead;
    liveness.egress_ip = Some("198.51.100.4".into());
    throughput.download_mbps = 33.5;
    throughput.upload_mbps = 7.25;

    store.save_resource(&liveness, ProbeFields::Liveness).await?;
    store.save_resource(&throughput, ProbeFields::Throughput).await?;

    let stored = store.get_resource(resource.id).await?.expect("resource exists");
    assert_eq!(stored.failures, 3);
    assert_eq!(stored.status, HealthStatus::Dead);
    assert_eq!(stored.egress_ip.as_deref(), Some("198.51.100.4"));
    assert_eq!(stored.download_mbps, 33.5);
    assert_eq!(stored.upload_mbps, 7.25);
    Ok(())
}

#[tokio::test]
async fn save_of_deleted_resource_is_ignored() -> Result<()> {
    let (pool, _dir) = create_test_database().await?;
    let store = LibsqlStore::new_from_pool(pool);

    let resource = ProxyResource::new(ProxyAddress::new("10.1.2.3", 3128));
    store.create_resource(&resource).await?;
    store.delete_resource(resource.id).await?;

    store.save_resource(&resource, ProbeFields::All).await?;
    assert!(store.list_resources().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn logs_are_ordered_and_filtered() -> Result<()> {
    let (pool, _dir) = create_test_database().await?;
    let store = LibsqlStore::new_from_pool(pool);
    let resource = ProxyResource::new(ProxyAddress::new("10.1.2.3", 3128));
    let now = Utc::now();

    store.append_ip_observation(&observation(resource.id, "198.51.100.1", now - Duration::hours(3))).await?;
    store.append_ip_observation(&observation(resource.id, "198.51.100.2", now)).await?;
    store.append_ip_observation(&observation(Uuid::new_v4(), "192.0.2.9", now)).await?;

    let last = store.last_ip_observation(resource.id).await?.expect("has history");
    assert_eq!(last.ip, "198.51.100.2");
    assert_eq!(last.country, "Germany");
    let history = store.ip_observations(resource.id).await?;
    assert_eq!(history.iter().map(|e| e.ip.as_str()).collect::<Vec<_>>(), ["198.51.100.1", "198.51.100.2"]);

    let old = FailureRecord::new(&resource, FailureCategory::Connectivity, "refused", now - Duration::days(9));
    let recent = FailureRecord::new(&resource, FailureCategory::EgressIp, "bad json", now - Duration::hours(1));
    store.append_failure_record(&old).await?;
    store.append_failure_record(&recent).await?;

    let window = store.failure_records(resource.id, now - Duration::days(7)).await?;
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].id, recent.id);
    assert_eq!(window[0].category, FailureCategory::EgressIp);
    assert_eq!(window[0].message, "bad json");

    store
        .append_speed_sample(&SpeedSample {
            id: Uuid::new_v4(),
            resource_id: resource.id,
            timestamp: now,
            download_mbps: 12.5,
            upload_mbps: 3.0,
        })
        .await?;
    let samples = store.speed_samples(resource.id).await?;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].download_mbps, 12.5);
    Ok(())
}

#[tokio::test]
async fn settings_are_persisted_through_the_handle() -> Result<()> {
    let (pool, _dir) = create_test_database().await?;
    let store = Arc::new(LibsqlStore::new_from_pool(pool));
    assert!(store.load_settings().await?.is_none());

    let handle = SettingsHandle::new(Settings::default());
    let updated = Settings { stuck_threshold_hours: 6, ..Default::default() };
    handle.apply(store.as_ref(), updated.clone()).await?;
    assert_eq!(store.load_settings().await?, Some(updated.clone()));

    let again = Settings { liveness_interval_minutes: 1, ..updated };
    handle.apply(store.as_ref(), again.clone()).await?;
    assert_eq!(store.load_settings().await?, Some(again));
    Ok(())
}

#[tokio::test]
async fn pipeline_runs_against_libsql() -> Result<()> {
    use proxyup::monitoring::{BatchRunner, CheckExecutor, DisabledIsp, HttpSpeedTester, Prober};
    use proxyup::monitoring::client::ReqwestClientFactory;
    use proxyup::CheckKind;
    use tokio_util::sync::CancellationToken;

    let (pool, _dir) = create_test_database().await?;
    let store = Arc::new(LibsqlStore::new_from_pool(pool));

    // Nothing listens on port 9 on localhost, so the check fails fast
    let resource = ProxyResource::new(ProxyAddress::new("127.0.0.1", 9));
    store.create_resource(&resource).await?;

    let settings = Settings { timeout_seconds: 2, ..Default::default() };
    let executor = CheckExecutor::new(
        store.clone(),
        SettingsHandle::new(settings),
        Prober::new(Arc::new(ReqwestClientFactory), Arc::new(HttpSpeedTester), Arc::new(DisabledIsp)),
        Notifier::disabled(),
    );

    let report = executor.run_batch(CheckKind::Liveness, CancellationToken::new()).await?;
    assert_eq!(report.processed, 1);

    let stored = store.get_resource(resource.id).await?.expect("resource exists");
    assert_eq!(stored.failures, 1);
    assert!(stored.last_check.is_none());
    let records = store.failure_records(resource.id, Utc::now() - Duration::hours(1)).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, FailureCategory::Connectivity);
    Ok(())
}
