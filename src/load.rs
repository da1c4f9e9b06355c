use crate::constants::TABLE_NAME;
use crate::error::{PipelineError, Result};
use crate::store::DestinationStore;
use crate::transform::EnrichedRecord;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub rows_loaded: u64,
    pub batches: u64,
}

/// Appends enriched records to the destination in fixed-size batches.
pub struct Loader {
    batch_size: usize,
}

impl Loader {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Each batch commits on its own. On failure, earlier batches stay
    /// committed and are reported through `LoadFailure::rows_committed`.
    pub async fn load<I>(&self, store: &dyn DestinationStore, records: I) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = EnrichedRecord>,
    {
        let mut records = records.into_iter();
        let mut summary = LoadSummary {
            rows_loaded: 0,
            batches: 0,
        };
        let mut batch = Vec::with_capacity(self.batch_size);

        loop {
            batch.clear();
            batch.extend(records.by_ref().take(self.batch_size));
            if batch.is_empty() {
                break;
            }

            match store.append_batch(TABLE_NAME, &batch).await {
                Ok(written) => {
                    summary.rows_loaded += written;
                    summary.batches += 1;
                    counter!("pageviews_rows_loaded_total").increment(written);
                    debug!(
                        "Committed batch {} ({} rows, {} total)",
                        summary.batches, written, summary.rows_loaded
                    );
                }
                Err(e) => {
                    if summary.rows_loaded > 0 {
                        warn!(
                            "⚠️  Partial load: {} rows from {} batches remain committed",
                            summary.rows_loaded, summary.batches
                        );
                    }
                    error!("Batch {} failed: {:#}", summary.batches + 1, e);
                    return Err(PipelineError::LoadFailure {
                        rows_committed: summary.rows_loaded,
                        message: format!("{e:#}"),
                    });
                }
            }
        }

        info!(
            "💾 Loaded {} rows in {} batches",
            summary.rows_loaded, summary.batches
        );
        Ok(summary)
    }
}
