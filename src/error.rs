use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Stages of a single pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Address,
    Fetch,
    Parse,
    Transform,
    Schema,
    Load,
    Verify,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Address => "address",
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Transform => "transform",
            Stage::Schema => "schema",
            Stage::Load => "load",
            Stage::Verify => "verify",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("remote snapshot unavailable at {url}{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    RemoteUnavailable {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("staging I/O failed for {}: {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot{}: {reason}", line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    MalformedSnapshot { line: Option<u64>, reason: String },

    #[error("schema check failed: {message}")]
    SchemaFailure { message: String },

    #[error("load failed after {rows_committed} committed rows: {message}")]
    LoadFailure { rows_committed: u64, message: String },

    #[error("verification failed: {message}")]
    VerificationFailure { message: String },

    #[error("window {window} already holds {existing_rows} rows from a load that never finished")]
    PartialWindow { window: String, existing_rows: u64 },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::IoFailure {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(line: Option<u64>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedSnapshot {
            line,
            reason: reason.into(),
        }
    }

    /// The stage that raised this error.
    ///
    /// `IoFailure` can come from either side of the staging file, so it is
    /// attributed to the fetch unless the caller re-tags it.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::RemoteUnavailable { .. } | PipelineError::IoFailure { .. } => Stage::Fetch,
            PipelineError::MalformedSnapshot { .. } => Stage::Parse,
            PipelineError::SchemaFailure { .. } => Stage::Schema,
            PipelineError::LoadFailure { .. } | PipelineError::PartialWindow { .. } => Stage::Load,
            PipelineError::VerificationFailure { .. } => Stage::Verify,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::RemoteUnavailable { .. } => "remote_unavailable",
            PipelineError::IoFailure { .. } => "io_failure",
            PipelineError::MalformedSnapshot { .. } => "malformed_snapshot",
            PipelineError::SchemaFailure { .. } => "schema_failure",
            PipelineError::LoadFailure { .. } => "load_failure",
            PipelineError::VerificationFailure { .. } => "verification_failure",
            PipelineError::PartialWindow { .. } => "partial_window",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_status_and_line() {
        let err = PipelineError::RemoteUnavailable {
            url: "https://example.org/x.gz".to_string(),
            status: Some(404),
            message: "not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "remote snapshot unavailable at https://example.org/x.gz (HTTP 404): not found"
        );

        let err = PipelineError::malformed(Some(7), "expected 4 fields, found 3");
        assert_eq!(
            err.to_string(),
            "malformed snapshot at line 7: expected 4 fields, found 3"
        );
        assert_eq!(err.stage(), Stage::Parse);
        assert_eq!(err.kind(), "malformed_snapshot");
    }

    #[test]
    fn test_partial_window_is_a_load_error() {
        let err = PipelineError::PartialWindow {
            window: "2025-03-08T07:00Z".to_string(),
            existing_rows: 1,
        };
        assert_eq!(err.stage(), Stage::Load);
        assert_eq!(err.kind(), "partial_window");
        assert_eq!(
            err.to_string(),
            "window 2025-03-08T07:00Z already holds 1 rows from a load that never finished"
        );
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Fetch < Stage::Parse);
        assert!(Stage::Load < Stage::Verify);
        assert!(Stage::Verify < Stage::Cleanup);
    }
}
