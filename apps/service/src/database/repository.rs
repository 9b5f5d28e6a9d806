use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use proxyup::{
    Credentials, FailureRecord, IpObservation, ProbeFields, ProxyAddress, ProxyResource,
    ResourceStore, Settings, SpeedSample,
};
use uuid::Uuid;

use crate::pool::{LibsqlManager, LibsqlPool};

const PROXY_COLUMNS: &str = "id, host, port, username, password, name, contact, tag, latency_ms, \
     status, failures, last_check, uptime_minutes, download_mbps, upload_mbps, egress_ip, \
     egress_country, operator, stuck, last_ip_change";

const IP_COLUMNS: &str = "id, proxy_id, timestamp, ip, previous_ip, country, previous_country, \
     isp, previous_isp, stuck";

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("timestamp out of range: {ms}"))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn parse_uuid(row: &Row, idx: i32) -> Result<Uuid> {
    let raw: String = row.get(idx)?;
    Ok(Uuid::parse_str(&raw)?)
}

fn proxy_from_row(row: &Row) -> Result<ProxyResource> {
    let username: Option<String> = row.get(3)?;
    let password: Option<String> = row.get(4)?;
    let credentials = username.map(|username| Credentials { username, password: password.unwrap_or_default() });
    let status: String = row.get(9)?;

    Ok(ProxyResource {
        id: parse_uuid(row, 0)?,
        address: ProxyAddress {
            host: row.get(1)?,
            port: u16::try_from(row.get::<i64>(2)?).context("port out of range")?,
            credentials,
        },
        name: row.get(5)?,
        contact: row.get(6)?,
        tag: row.get(7)?,
        latency_ms: row.get::<i64>(8)?.max(0) as u64,
        status: status.parse().map_err(anyhow::Error::msg)?,
        failures: row.get::<i64>(10)?.max(0) as u32,
        last_check: opt_from_millis(row.get(11)?)?,
        uptime_minutes: row.get::<i64>(12)?.max(0) as u64,
        download_mbps: row.get(13)?,
        upload_mbps: row.get(14)?,
        egress_ip: row.get(15)?,
        egress_country: row.get(16)?,
        operator: row.get(17)?,
        stuck: row.get::<i64>(18)? != 0,
        last_ip_change: opt_from_millis(row.get(19)?)?,
    })
}

fn observation_from_row(row: &Row) -> Result<IpObservation> {
    Ok(IpObservation {
        id: parse_uuid(row, 0)?,
        resource_id: parse_uuid(row, 1)?,
        timestamp: from_millis(row.get(2)?)?,
        ip: row.get(3)?,
        previous_ip: row.get(4)?,
        country: row.get(5)?,
        previous_country: row.get(6)?,
        isp: row.get(7)?,
        previous_isp: row.get(8)?,
        stuck: row.get::<i64>(9)? != 0,
    })
}

fn failure_from_row(row: &Row) -> Result<FailureRecord> {
    let category: String = row.get(3)?;
    Ok(FailureRecord {
        id: parse_uuid(row, 0)?,
        resource_id: parse_uuid(row, 1)?,
        timestamp: from_millis(row.get(2)?)?,
        category: category.parse().map_err(anyhow::Error::msg)?,
        message: row.get(4)?,
        latency_ms: row.get::<i64>(5)?.max(0) as u64,
    })
}

/// [`ResourceStore`] backed by a pooled libsql database
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    pub async fn speed_samples(&self, resource_id: Uuid) -> Result<Vec<SpeedSample>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, proxy_id, timestamp, download_mbps, upload_mbps FROM speed_samples
                 WHERE proxy_id = ? ORDER BY timestamp ASC, rowid ASC",
                params![resource_id.to_string()],
            )
            .await?;

        let mut samples = Vec::new();
        while let Some(row) = rows.next().await? {
            samples.push(SpeedSample {
                id: parse_uuid(&row, 0)?,
                resource_id: parse_uuid(&row, 1)?,
                timestamp: from_millis(row.get(2)?)?,
                download_mbps: row.get(3)?,
                upload_mbps: row.get(4)?,
            });
        }
        Ok(samples)
    }
}

#[async_trait]
impl ResourceStore for LibsqlStore {
    async fn list_resources(&self) -> Result<Vec<ProxyResource>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {PROXY_COLUMNS} FROM proxies ORDER BY created_at, rowid"), ())
            .await?;

        let mut resources = Vec::new();
        while let Some(row) = rows.next().await? {
            resources.push(proxy_from_row(&row)?);
        }
        Ok(resources)
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<ProxyResource>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {PROXY_COLUMNS} FROM proxies WHERE id = ?"), params![id.to_string()])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(proxy_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_resource(&self, r: &ProxyResource) -> Result<()> {
        let conn = self.get_conn().await?;
        let (username, password) = match &r.address.credentials {
            Some(c) => (Some(c.username.clone()), Some(c.password.clone())),
            None => (None, None),
        };

        conn.execute(
            &format!("INSERT INTO proxies ({PROXY_COLUMNS}, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                r.id.to_string(),
                r.address.host.clone(),
                i64::from(r.address.port),
                username,
                password,
                r.name.clone(),
                r.contact.clone(),
                r.tag.clone(),
                r.latency_ms as i64,
                r.status.as_str(),
                i64::from(r.failures),
                r.last_check.map(to_millis),
                r.uptime_minutes as i64,
                r.download_mbps,
                r.upload_mbps,
                r.egress_ip.clone(),
                r.egress_country.clone(),
                r.operator.clone(),
                i64::from(r.stuck),
                r.last_ip_change.map(to_millis),
                to_millis(Utc::now()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_resource(&self, id: Uuid) -> Result<bool> {
        let conn = self.get_conn().await?;
        let affected = conn.execute("DELETE FROM proxies WHERE id = ?", params![id.to_string()]).await?;
        Ok(affected > 0)
    }

    async fn save_resource(&self, r: &ProxyResource, fields: ProbeFields) -> Result<()> {
        let conn = self.get_conn().await?;

        // UPDATE only: a proxy deleted mid-batch stays deleted
        if fields.includes_liveness() {
            conn.execute(
                "UPDATE proxies SET latency_ms = ?, status = ?, failures = ?, last_check = ?,
                    uptime_minutes = ?, egress_ip = ?, egress_country = ?, operator = ?, stuck = ?,
                    last_ip_change = ?
                 WHERE id = ?",
                params![
                    r.latency_ms as i64,
                    r.status.as_str(),
                    i64::from(r.failures),
                    r.last_check.map(to_millis),
                    r.uptime_minutes as i64,
                    r.egress_ip.clone(),
                    r.egress_country.clone(),
                    r.operator.clone(),
                    i64::from(r.stuck),
                    r.last_ip_change.map(to_millis),
                    r.id.to_string(),
                ],
            )
            .await?;
        }

        if fields.includes_throughput() {
            conn.execute(
                "UPDATE proxies SET download_mbps = ?, upload_mbps = ? WHERE id = ?",
                params![r.download_mbps, r.upload_mbps, r.id.to_string()],
            )
            .await?;
        }

        Ok(())
    }

    async fn append_ip_observation(&self, e: &IpObservation) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            &format!("INSERT INTO ip_observations ({IP_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                e.id.to_string(),
                e.resource_id.to_string(),
                to_millis(e.timestamp),
                e.ip.clone(),
                e.previous_ip.clone(),
                e.country.clone(),
                e.previous_country.clone(),
                e.isp.clone(),
                e.previous_isp.clone(),
                i64::from(e.stuck),
            ],
        )
        .await?;
        Ok(())
    }

    async fn last_ip_observation(&self, resource_id: Uuid) -> Result<Option<IpObservation>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {IP_COLUMNS} FROM ip_observations WHERE proxy_id = ?
                     ORDER BY timestamp DESC, rowid DESC LIMIT 1"
                ),
                params![resource_id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(observation_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn ip_observations(&self, resource_id: Uuid) -> Result<Vec<IpObservation>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {IP_COLUMNS} FROM ip_observations WHERE proxy_id = ?
                     ORDER BY timestamp ASC, rowid ASC"
                ),
                params![resource_id.to_string()],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(observation_from_row(&row)?);
        }
        Ok(entries)
    }

    async fn append_failure_record(&self, e: &FailureRecord) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO failure_records (id, proxy_id, timestamp, category, message, latency_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                e.id.to_string(),
                e.resource_id.to_string(),
                to_millis(e.timestamp),
                e.category.as_str(),
                e.message.clone(),
                e.latency_ms as i64,
            ],
        )
        .await?;
        Ok(())
    }

    async fn failure_records(
        &self,
        resource_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<FailureRecord>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, proxy_id, timestamp, category, message, latency_ms FROM failure_records
                 WHERE proxy_id = ? AND timestamp >= ? ORDER BY timestamp ASC, rowid ASC",
                params![resource_id.to_string(), to_millis(since)],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(failure_from_row(&row)?);
        }
        Ok(records)
    }

    async fn append_speed_sample(&self, s: &SpeedSample) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO speed_samples (id, proxy_id, timestamp, download_mbps, upload_mbps)
             VALUES (?, ?, ?, ?, ?)",
            params![
                s.id.to_string(),
                s.resource_id.to_string(),
                to_millis(s.timestamp),
                s.download_mbps,
                s.upload_mbps,
            ],
        )
        .await?;
        Ok(())
    }

    async fn load_settings(&self) -> Result<Option<Settings>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT data FROM settings WHERE id = 1", ()).await?;

        match rows.next().await? {
            Some(row) => {
                let data: String = row.get(0)?;
                let settings = serde_json::from_str(&data).context("stored settings are corrupt")?;
                Ok(Some(settings))
            }
            None => Ok(None),
        }
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO settings (id, data, updated_at) VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![serde_json::to_string(settings)?, to_millis(Utc::now())],
        )
        .await?;
        Ok(())
    }
}
