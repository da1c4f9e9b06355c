use super::{
    format_timestamp, from_sql_count, insert_sql, loaded_window_sql, mark_window_sql,
    to_sql_integer, ColumnInfo, DestinationStore,
};
use crate::transform::EnrichedRecord;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database {}", path.display()))?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> anyhow::Result<T>) -> anyhow::Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection mutex poisoned"))?;
        f(&mut *conn)
    }

    fn table_exists(conn: &Connection, table: &str) -> anyhow::Result<bool> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }
}

#[async_trait]
impl DestinationStore for SqliteStore {
    async fn execute_ddl(&self, ddl: &str) -> anyhow::Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(ddl)?;
            Ok(())
        })
    }

    async fn table_columns(&self, table: &str) -> anyhow::Result<Vec<ColumnInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        name: row.get(1)?,
                        declared_type: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(columns)
        })
    }

    async fn append_batch(&self, table: &str, batch: &[EnrichedRecord]) -> anyhow::Result<u64> {
        let sql = insert_sql(table);
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(&sql)?;
                for record in batch {
                    stmt.execute(params![
                        record.domain_code,
                        record.page_title,
                        to_sql_integer(record.view_count, "view_count")?,
                        to_sql_integer(record.response_size, "response_size")?,
                        record.project,
                        format_timestamp(&record.dt_hour),
                        format_timestamp(&record.fetched_at),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(batch.len() as u64)
        })
    }

    async fn count_rows(&self, table: &str) -> anyhow::Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            from_sql_count(n)
        })
    }

    async fn count_window(
        &self,
        table: &str,
        project: &str,
        dt_hour: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        self.with_conn(|conn| {
            if !Self::table_exists(conn, table)? {
                return Ok(0);
            }
            let n: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE project = ?1 AND dt_hour = ?2"),
                params![project, format_timestamp(&dt_hour)],
                |row| row.get(0),
            )?;
            from_sql_count(n)
        })
    }

    async fn mark_window_loaded(
        &self,
        table: &str,
        project: &str,
        dt_hour: DateTime<Utc>,
        rows: u64,
    ) -> anyhow::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &mark_window_sql(table),
                params![project, format_timestamp(&dt_hour), to_sql_integer(rows, "row_count")?],
            )?;
            Ok(())
        })
    }

    async fn loaded_window(
        &self,
        table: &str,
        project: &str,
        dt_hour: DateTime<Utc>,
    ) -> anyhow::Result<Option<u64>> {
        self.with_conn(|conn| {
            if !Self::table_exists(conn, table)? {
                return Ok(None);
            }
            let rows: Option<i64> = conn
                .query_row(
                    &loaded_window_sql(table),
                    params![project, format_timestamp(&dt_hour)],
                    |row| row.get(0),
                )
                .optional()?;
            rows.map(from_sql_count).transpose()
        })
    }
}
