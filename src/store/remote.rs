use super::{
    format_timestamp, from_sql_count, insert_sql, loaded_window_sql, mark_window_sql,
    to_sql_integer, ColumnInfo, DestinationStore,
};
use crate::transform::EnrichedRecord;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database};
use tracing::{debug, info};

/// Remote Turso/libSQL destination.
pub struct LibsqlStore {
    db: Database,
}

impl LibsqlStore {
    pub async fn connect(url: &str, auth_token: &str) -> anyhow::Result<Self> {
        info!("Connecting to Turso database at {}", url);
        let db = Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .context("failed to connect to database")?;
        Ok(Self { db })
    }

    fn connection(&self) -> anyhow::Result<Connection> {
        self.db
            .connect()
            .context("failed to get database connection")
    }

    async fn table_exists(conn: &Connection, table: &str) -> anyhow::Result<bool> {
        let n = Self::single_count(
            conn,
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            libsql::params![table.to_string()],
        )
        .await?;
        Ok(n > 0)
    }

    async fn single_count(conn: &Connection, sql: &str, params: impl libsql::params::IntoParams) -> anyhow::Result<u64> {
        let mut rows = conn.query(sql, params).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| anyhow!("count query returned no rows"))?;
        from_sql_count(row.get::<i64>(0)?)
    }
}

#[async_trait]
impl DestinationStore for LibsqlStore {
    async fn execute_ddl(&self, ddl: &str) -> anyhow::Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(ddl).await.context("failed to run DDL")?;
        Ok(())
    }

    async fn table_columns(&self, table: &str) -> anyhow::Result<Vec<ColumnInfo>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(&format!("PRAGMA table_info({table})"), libsql::params![])
            .await?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next().await? {
            columns.push(ColumnInfo {
                name: row.get::<String>(1)?,
                declared_type: row.get::<String>(2)?,
            });
        }
        Ok(columns)
    }

    async fn append_batch(&self, table: &str, batch: &[EnrichedRecord]) -> anyhow::Result<u64> {
        let conn = self.connection()?;
        let sql = insert_sql(table);
        let tx = conn.transaction().await?;
        for record in batch {
            tx.execute(
                &sql,
                libsql::params![
                    record.domain_code.clone(),
                    record.page_title.clone(),
                    to_sql_integer(record.view_count, "view_count")?,
                    to_sql_integer(record.response_size, "response_size")?,
                    record.project.clone(),
                    format_timestamp(&record.dt_hour),
                    format_timestamp(&record.fetched_at),
                ],
            )
            .await?;
        }
        tx.commit().await?;
        debug!("Committed batch of {} rows", batch.len());
        Ok(batch.len() as u64)
    }

    async fn count_rows(&self, table: &str) -> anyhow::Result<u64> {
        let conn = self.connection()?;
        Self::single_count(&conn, &format!("SELECT COUNT(*) FROM {table}"), libsql::params![]).await
    }

    async fn count_window(
        &self,
        table: &str,
        project: &str,
        dt_hour: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let conn = self.connection()?;
        if !Self::table_exists(&conn, table).await? {
            return Ok(0);
        }
        Self::single_count(
            &conn,
            &format!("SELECT COUNT(*) FROM {table} WHERE project = ?1 AND dt_hour = ?2"),
            libsql::params![project.to_string(), format_timestamp(&dt_hour)],
        )
        .await
    }

    async fn mark_window_loaded(
        &self,
        table: &str,
        project: &str,
        dt_hour: DateTime<Utc>,
        rows: u64,
    ) -> anyhow::Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &mark_window_sql(table),
            libsql::params![
                project.to_string(),
                format_timestamp(&dt_hour),
                to_sql_integer(rows, "row_count")?,
            ],
        )
        .await?;
        Ok(())
    }

    async fn loaded_window(
        &self,
        table: &str,
        project: &str,
        dt_hour: DateTime<Utc>,
    ) -> anyhow::Result<Option<u64>> {
        let conn = self.connection()?;
        if !Self::table_exists(&conn, table).await? {
            return Ok(None);
        }
        let mut rows = conn
            .query(
                &loaded_window_sql(table),
                libsql::params![project.to_string(), format_timestamp(&dt_hour)],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(from_sql_count(row.get::<i64>(0)?)?)),
            None => Ok(None),
        }
    }
}
