use anyhow::Result;
use chrono::Utc;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// This is the single source of truth for the database schema.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    // Create schema_migrations table first (tracks applied migrations)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Proxies, IP observations, failure log and settings").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Speed samples and log indexes").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
pub async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, Utc::now().timestamp(), description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS proxies (
            id TEXT PRIMARY KEY,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            username TEXT,
            password TEXT,
            name TEXT NOT NULL DEFAULT '',
            contact TEXT NOT NULL DEFAULT '',
            tag TEXT NOT NULL DEFAULT '',
            latency_ms INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'alive',
            failures INTEGER NOT NULL DEFAULT 0,
            last_check INTEGER,
            uptime_minutes INTEGER NOT NULL DEFAULT 0,
            download_mbps REAL NOT NULL DEFAULT 0,
            upload_mbps REAL NOT NULL DEFAULT 0,
            egress_ip TEXT,
            egress_country TEXT NOT NULL DEFAULT '',
            operator TEXT NOT NULL DEFAULT '',
            stuck INTEGER NOT NULL DEFAULT 0,
            last_ip_change INTEGER,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    // Log tables outlive the proxy they describe, so no foreign keys
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ip_observations (
            id TEXT PRIMARY KEY,
            proxy_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            ip TEXT NOT NULL,
            previous_ip TEXT,
            country TEXT NOT NULL DEFAULT '',
            previous_country TEXT NOT NULL DEFAULT '',
            isp TEXT NOT NULL DEFAULT '',
            previous_isp TEXT NOT NULL DEFAULT '',
            stuck INTEGER NOT NULL DEFAULT 0
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS failure_records (
            id TEXT PRIMARY KEY,
            proxy_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            category TEXT NOT NULL,
            message TEXT NOT NULL,
            latency_ms INTEGER NOT NULL DEFAULT 0
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    Ok(())
}

async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS speed_samples (
            id TEXT PRIMARY KEY,
            proxy_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            download_mbps REAL NOT NULL,
            upload_mbps REAL NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ip_observations_proxy_time
            ON ip_observations(proxy_id, timestamp)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_failure_records_proxy_time
            ON failure_records(proxy_id, timestamp)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_speed_samples_proxy_time
            ON speed_samples(proxy_id, timestamp)",
        (),
    )
    .await?;

    Ok(())
}
