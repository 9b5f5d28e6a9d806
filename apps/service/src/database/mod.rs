/// Database layer
///
/// libsql (SQLite) persistence for proxies, their append-only logs and the
/// check settings, exposed through `proxyup::ResourceStore`.

pub mod migrations;
pub mod repository;

#[cfg(test)]
mod tests;

pub use repository::LibsqlStore;

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
