use crate::constants::TABLE_NAME;
use crate::error::{PipelineError, Result};
use crate::store::DestinationStore;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub total_rows: u64,
    pub rows_loaded: u64,
}

/// Count the destination rows after a load.
///
/// A table holding fewer rows than were just loaded is inconsistent.
pub async fn verify(store: &dyn DestinationStore, rows_loaded: u64) -> Result<Verification> {
    let total_rows = store
        .count_rows(TABLE_NAME)
        .await
        .map_err(|e| PipelineError::VerificationFailure {
            message: format!("count query failed: {e:#}"),
        })?;

    if total_rows < rows_loaded {
        return Err(PipelineError::VerificationFailure {
            message: format!("{TABLE_NAME} holds {total_rows} rows but {rows_loaded} were just loaded"),
        });
    }

    info!("📊 Total rows in {}: {}", TABLE_NAME, total_rows);
    Ok(Verification {
        total_rows,
        rows_loaded,
    })
}
