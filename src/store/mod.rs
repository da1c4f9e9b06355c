//! Destination store port and its adapters.
//!
//! The pipeline only talks to [`DestinationStore`]; the SQLite adapter is the
//! default and the remote libSQL adapter is available behind the `db` feature.

#[cfg(feature = "db")]
pub mod remote;
pub mod sqlite;

use crate::config::StoreConfig;
use crate::constants::TIMESTAMP_FORMAT;
use crate::transform::EnrichedRecord;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

pub use self::sqlite::SqliteStore;

/// A column as reported by the store's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Run one or more DDL statements.
    async fn execute_ddl(&self, ddl: &str) -> anyhow::Result<()>;

    /// Columns of `table`; empty when the table does not exist.
    async fn table_columns(&self, table: &str) -> anyhow::Result<Vec<ColumnInfo>>;

    /// Append `batch` atomically and return the number of rows written.
    async fn append_batch(&self, table: &str, batch: &[EnrichedRecord]) -> anyhow::Result<u64>;

    async fn count_rows(&self, table: &str) -> anyhow::Result<u64>;

    /// Rows already stored for one `(project, dt_hour)`; 0 when the table is absent.
    async fn count_window(
        &self,
        table: &str,
        project: &str,
        dt_hour: DateTime<Utc>,
    ) -> anyhow::Result<u64>;

    /// Record in `table` that the load of `(project, dt_hour)` finished with `rows` rows.
    async fn mark_window_loaded(
        &self,
        table: &str,
        project: &str,
        dt_hour: DateTime<Utc>,
        rows: u64,
    ) -> anyhow::Result<()>;

    /// Row count recorded by [`DestinationStore::mark_window_loaded`]; `None`
    /// when no load of the window finished or the table is absent.
    async fn loaded_window(
        &self,
        table: &str,
        project: &str,
        dt_hour: DateTime<Utc>,
    ) -> anyhow::Result<Option<u64>>;
}

/// Open the configured destination.
pub async fn open(config: &StoreConfig) -> anyhow::Result<Box<dyn DestinationStore>> {
    match (&config.libsql_url, &config.libsql_auth_token) {
        #[cfg(feature = "db")]
        (Some(url), Some(token)) => {
            info!("Connecting to libSQL destination at {}", url);
            Ok(Box::new(self::remote::LibsqlStore::connect(url, token).await?))
        }
        (Some(_), None) => Err(anyhow!(
            "LIBSQL_URL is set but LIBSQL_AUTH_TOKEN is missing"
        )),
        #[cfg(not(feature = "db"))]
        (Some(_), Some(_)) => Err(anyhow!(
            "LIBSQL_URL is set but this build lacks the `db` feature"
        )),
        _ => {
            info!("Opening SQLite destination at {}", config.sqlite_path.display());
            Ok(Box::new(SqliteStore::open(&config.sqlite_path)?))
        }
    }
}

pub(crate) fn insert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (domain_code, page_title, view_count, response_size, project, dt_hour, fetched_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
    )
}

pub(crate) fn mark_window_sql(table: &str) -> String {
    format!("INSERT OR REPLACE INTO {table} (project, dt_hour, row_count) VALUES (?1, ?2, ?3)")
}

pub(crate) fn loaded_window_sql(table: &str) -> String {
    format!("SELECT row_count FROM {table} WHERE project = ?1 AND dt_hour = ?2")
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// SQL INTEGER is signed 64-bit.
pub(crate) fn to_sql_integer(value: u64, field: &str) -> anyhow::Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{field} {value} exceeds the INTEGER range"))
}

pub(crate) fn from_sql_count(value: i64) -> anyhow::Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("store returned a negative count: {value}"))
}
