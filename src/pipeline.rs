use crate::config::{Config, LoadConfig, SourceConfig};
use crate::constants::{LOADS_TABLE_NAME, TABLE_NAME};
use crate::error::{PipelineError, Result, Stage};
use crate::fetch::Fetcher;
use crate::load::Loader;
use crate::parse::{self, PageviewRecord};
use crate::schema::ensure_schema;
use crate::snapshot::{SnapshotAddress, SnapshotWindow};
use crate::store::DestinationStore;
use crate::transform::Provenance;
use crate::verify::verify;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Terminal outcome of one run.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    /// The window was already loaded completely; nothing was fetched.
    Skipped { existing_rows: u64 },
    /// Rows were loaded but the post-load count could not confirm them.
    Degraded {
        #[serde(serialize_with = "serialize_error")]
        error: PipelineError,
    },
    Failed {
        stage: Stage,
        #[serde(serialize_with = "serialize_error")]
        error: PipelineError,
    },
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Skipped { .. } => "skipped",
            RunOutcome::Degraded { .. } => "degraded",
            RunOutcome::Failed { .. } => "failed",
        }
    }
}

fn serialize_error<S: Serializer>(error: &PipelineError, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let mut s = serializer.serialize_struct("PipelineError", 2)?;
    s.serialize_field("kind", error.kind())?;
    s.serialize_field("message", &error.to_string())?;
    s.end()
}

/// Summary of one run, handed back to the caller and written to the run journal.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub window: SnapshotWindow,
    pub url: String,
    pub staging_path: PathBuf,
    /// Last stage that completed before the run ended.
    pub reached: Stage,
    pub payload_bytes: Option<u64>,
    pub payload_sha256: Option<String>,
    pub rows_parsed: u64,
    /// Rows committed to the destination, including those of a partial load.
    pub rows_loaded: u64,
    pub total_rows: Option<u64>,
    pub cleaned_up: bool,
    pub outcome: RunOutcome,
}

impl RunReport {
    fn new(started_at: DateTime<Utc>, address: &SnapshotAddress) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            window: address.window,
            url: address.url.clone(),
            staging_path: address.staging_path.clone(),
            reached: Stage::Address,
            payload_bytes: None,
            payload_sha256: None,
            rows_parsed: 0,
            rows_loaded: 0,
            total_rows: None,
            cleaned_up: false,
            outcome: RunOutcome::Succeeded,
        }
    }

    fn complete(&mut self, stage: Stage, started: Instant) {
        self.reached = stage;
        histogram!("pageviews_stage_duration_seconds", "stage" => stage.as_str())
            .record(started.elapsed().as_secs_f64());
    }
}

enum Preflight {
    Fresh,
    Complete { rows: u64 },
    Partial { rows: u64 },
}

/// The fetch, parse, transform, load and verify chain for one hourly snapshot.
pub struct Pipeline {
    source: SourceConfig,
    load: LoadConfig,
    fetcher: Fetcher,
    loader: Loader,
}

impl Pipeline {
    pub fn new(source: SourceConfig, load: LoadConfig) -> reqwest::Result<Self> {
        let fetcher = Fetcher::new(source.http_timeout())?;
        let loader = Loader::new(load.batch_size);
        Ok(Self {
            source,
            load,
            fetcher,
            loader,
        })
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        Self::new(config.source.clone(), config.load.clone())
    }

    pub fn address(&self, now: DateTime<Utc>) -> SnapshotAddress {
        SnapshotAddress::resolve(now, &self.source)
    }

    /// Run once for the snapshot preceding `now`.
    ///
    /// Never returns early past the fetch: the staging file is cleaned up on
    /// every outcome once it exists.
    pub async fn run(&self, now: DateTime<Utc>, store: &dyn DestinationStore) -> RunReport {
        let address = self.address(now);
        let mut report = RunReport::new(now, &address);
        let span = info_span!("pipeline_run", run_id = %report.run_id, window = %address.window);

        async {
            self.execute(now, &address, store, &mut report).await;
            counter!("pageviews_runs_total", "outcome" => report.outcome.label()).increment(1);
            match &report.outcome {
                RunOutcome::Succeeded => info!(
                    "✅ Run succeeded: {} rows loaded, {} total",
                    report.rows_loaded,
                    report.total_rows.unwrap_or_default()
                ),
                RunOutcome::Skipped { existing_rows } => info!(
                    "⏭️  Window {} already holds {} rows, skipped",
                    address.window, existing_rows
                ),
                RunOutcome::Degraded { error } => warn!(
                    "⚠️  Run degraded after loading {} rows: {}",
                    report.rows_loaded, error
                ),
                RunOutcome::Failed { stage, error } => error!(
                    "❌ Run failed at {} ({} rows committed): {}",
                    stage, report.rows_loaded, error
                ),
            }
        }
        .instrument(span)
        .await;

        report
    }

    async fn execute(
        &self,
        now: DateTime<Utc>,
        address: &SnapshotAddress,
        store: &dyn DestinationStore,
        report: &mut RunReport,
    ) {
        info!("🚀 Starting run for window {} from {}", address.window, address.url);

        if self.load.skip_loaded_windows {
            match self.preflight(&address.window, store).await {
                Ok(Preflight::Fresh) => {}
                Ok(Preflight::Complete { rows }) => {
                    report.cleaned_up = true;
                    report.outcome = RunOutcome::Skipped {
                        existing_rows: rows,
                    };
                    return;
                }
                Ok(Preflight::Partial { rows }) => {
                    report.cleaned_up = true;
                    report.outcome = RunOutcome::Failed {
                        stage: Stage::Load,
                        error: PipelineError::PartialWindow {
                            window: address.window.to_string(),
                            existing_rows: rows,
                        },
                    };
                    return;
                }
                Err(e) => warn!(
                    "Could not check for an earlier load of {}: {:#}; continuing",
                    address.window, e
                ),
            }
        }

        let t_fetch = Instant::now();
        let fetched = match self.fetcher.fetch(&address.url, &address.staging_path).await {
            Ok(fetched) => fetched,
            Err(e) => {
                // The fetcher never leaves a file behind on failure.
                report.cleaned_up = true;
                report.outcome = RunOutcome::Failed {
                    stage: Stage::Fetch,
                    error: e,
                };
                return;
            }
        };
        report.payload_bytes = Some(fetched.bytes);
        report.payload_sha256 = Some(fetched.sha256.clone());
        report.complete(Stage::Fetch, t_fetch);

        report.outcome = match self
            .load_snapshot(fetched.staging.path(), &address.window, now, store, report)
            .await
        {
            Err(error) => RunOutcome::Failed {
                stage: next_stage(report.reached),
                error,
            },
            Ok(()) => {
                let t_verify = Instant::now();
                match verify(store, report.rows_loaded).await {
                    Ok(v) => {
                        report.total_rows = Some(v.total_rows);
                        report.complete(Stage::Verify, t_verify);
                        RunOutcome::Succeeded
                    }
                    Err(error) => RunOutcome::Degraded { error },
                }
            }
        };

        report.cleaned_up = fetched.staging.cleanup().is_clean();
        if report.cleaned_up {
            info!("🧹 Cleanup complete");
        }
    }

    /// A window counts as loaded only once its completion marker exists.
    /// Rows without a marker are left over from a load that failed part way.
    async fn preflight(
        &self,
        window: &SnapshotWindow,
        store: &dyn DestinationStore,
    ) -> anyhow::Result<Preflight> {
        let project = &self.load.project;
        if let Some(rows) = store
            .loaded_window(LOADS_TABLE_NAME, project, window.start())
            .await?
        {
            return Ok(Preflight::Complete { rows });
        }
        match store.count_window(TABLE_NAME, project, window.start()).await? {
            0 => Ok(Preflight::Fresh),
            rows => Ok(Preflight::Partial { rows }),
        }
    }

    /// Parse the staged file completely, then ensure the schema and load.
    async fn load_snapshot(
        &self,
        staging_path: &Path,
        window: &SnapshotWindow,
        now: DateTime<Utc>,
        store: &dyn DestinationStore,
        report: &mut RunReport,
    ) -> Result<()> {
        let t_parse = Instant::now();
        let records = parse::open(staging_path)?.collect::<Result<Vec<PageviewRecord>>>()?;
        report.rows_parsed = records.len() as u64;
        counter!("pageviews_rows_parsed_total").increment(report.rows_parsed);
        info!("📄 Parsed {} rows", report.rows_parsed);
        report.complete(Stage::Parse, t_parse);

        let t_transform = Instant::now();
        let provenance = Provenance::new(self.load.project.clone(), window, now);
        let enriched = records.into_iter().map(|r| provenance.enrich(r));
        report.complete(Stage::Transform, t_transform);

        let t_schema = Instant::now();
        ensure_schema(store).await?;
        report.complete(Stage::Schema, t_schema);

        let t_load = Instant::now();
        match self.loader.load(store, enriched).await {
            Ok(summary) => report.rows_loaded = summary.rows_loaded,
            Err(e) => {
                if let PipelineError::LoadFailure { rows_committed, .. } = &e {
                    report.rows_loaded = *rows_committed;
                }
                return Err(e);
            }
        }
        store
            .mark_window_loaded(LOADS_TABLE_NAME, &self.load.project, window.start(), report.rows_loaded)
            .await
            .map_err(|e| PipelineError::LoadFailure {
                rows_committed: report.rows_loaded,
                message: format!("rows committed but the window was not marked complete: {e:#}"),
            })?;
        report.complete(Stage::Load, t_load);
        Ok(())
    }
}

fn next_stage(stage: Stage) -> Stage {
    match stage {
        Stage::Address => Stage::Fetch,
        Stage::Fetch => Stage::Parse,
        Stage::Parse => Stage::Transform,
        Stage::Transform => Stage::Schema,
        Stage::Schema => Stage::Load,
        Stage::Load => Stage::Verify,
        Stage::Verify | Stage::Cleanup => Stage::Cleanup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_stage_follows_run_order() {
        assert_eq!(next_stage(Stage::Fetch), Stage::Parse);
        assert_eq!(next_stage(Stage::Schema), Stage::Load);
        assert_eq!(next_stage(Stage::Cleanup), Stage::Cleanup);
    }

    #[test]
    fn test_failed_outcome_serializes_kind_and_message() {
        let outcome = RunOutcome::Failed {
            stage: Stage::Load,
            error: PipelineError::LoadFailure {
                rows_committed: 0,
                message: "connection lost".to_string(),
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], "load");
        assert_eq!(json["error"]["kind"], "load_failure");
        assert_eq!(
            json["error"]["message"],
            "load failed after 0 committed rows: connection lost"
        );
        assert!(outcome.is_failure());
    }
}
