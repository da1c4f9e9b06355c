use crate::constants::{LOADS_TABLE_NAME, TABLE_NAME};
use crate::error::{PipelineError, Result};
use crate::store::DestinationStore;
use tracing::{debug, info};

/// Expected `(column, declared type)` pairs of the destination table.
pub const EXPECTED_COLUMNS: [(&str, &str); 8] = [
    ("id", "INTEGER"),
    ("domain_code", "TEXT"),
    ("page_title", "TEXT"),
    ("view_count", "INTEGER"),
    ("response_size", "INTEGER"),
    ("project", "TEXT"),
    ("dt_hour", "TIMESTAMP"),
    ("fetched_at", "TIMESTAMP"),
];

pub fn create_table_ddl() -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain_code TEXT,
            page_title TEXT,
            view_count INTEGER,
            response_size INTEGER,
            project TEXT,
            dt_hour TIMESTAMP,
            fetched_at TIMESTAMP
        )
        "#
    )
}

/// Non-unique index backing the already-loaded window check.
pub fn create_index_ddl() -> String {
    format!("CREATE INDEX IF NOT EXISTS {TABLE_NAME}_window_idx ON {TABLE_NAME} (project, dt_hour)")
}

/// Completed-load markers, one per `(project, dt_hour)`.
pub fn create_loads_ddl() -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {LOADS_TABLE_NAME} (
            project TEXT NOT NULL,
            dt_hour TIMESTAMP NOT NULL,
            row_count INTEGER NOT NULL,
            loaded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (project, dt_hour)
        )
        "#
    )
}

/// Create the destination table if absent, then check that its shape matches.
///
/// Never drops or alters an existing table.
pub async fn ensure_schema(store: &dyn DestinationStore) -> Result<()> {
    store
        .execute_ddl(&create_table_ddl())
        .await
        .map_err(|e| PipelineError::SchemaFailure {
            message: format!("failed to create {TABLE_NAME}: {e:#}"),
        })?;

    let columns = store
        .table_columns(TABLE_NAME)
        .await
        .map_err(|e| PipelineError::SchemaFailure {
            message: format!("failed to describe {TABLE_NAME}: {e:#}"),
        })?;

    let mut problems = Vec::new();
    for (name, expected_type) in EXPECTED_COLUMNS {
        match columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)) {
            None => problems.push(format!("missing column {name}")),
            Some(col) if !col.declared_type.eq_ignore_ascii_case(expected_type) => {
                problems.push(format!(
                    "column {name} is {} (expected {expected_type})",
                    col.declared_type
                ));
            }
            Some(_) => {}
        }
    }
    if !problems.is_empty() {
        return Err(PipelineError::SchemaFailure {
            message: format!("{TABLE_NAME} has an incompatible shape: {}", problems.join(", ")),
        });
    }

    store
        .execute_ddl(&create_index_ddl())
        .await
        .map_err(|e| PipelineError::SchemaFailure {
            message: format!("failed to index {TABLE_NAME}: {e:#}"),
        })?;

    store
        .execute_ddl(&create_loads_ddl())
        .await
        .map_err(|e| PipelineError::SchemaFailure {
            message: format!("failed to create {LOADS_TABLE_NAME}: {e:#}"),
        })?;

    debug!("{} has {} columns", TABLE_NAME, columns.len());
    info!("🗄️  Schema ready for {}", TABLE_NAME);
    Ok(())
}
