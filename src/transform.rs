use crate::parse::PageviewRecord;
use crate::snapshot::SnapshotWindow;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A parsed row plus the provenance it is stored with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichedRecord {
    pub domain_code: String,
    pub page_title: String,
    pub view_count: u64,
    pub response_size: u64,
    pub project: String,
    pub dt_hour: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// Fixed provenance shared by every record of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub project: String,
    pub dt_hour: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

impl Provenance {
    pub fn new(project: impl Into<String>, window: &SnapshotWindow, fetched_at: DateTime<Utc>) -> Self {
        Self {
            project: project.into(),
            dt_hour: window.start(),
            fetched_at,
        }
    }

    pub fn enrich(&self, record: PageviewRecord) -> EnrichedRecord {
        EnrichedRecord {
            domain_code: record.domain_code,
            page_title: record.page_title,
            view_count: record.view_count,
            response_size: record.response_size,
            project: self.project.clone(),
            dt_hour: self.dt_hour,
            fetched_at: self.fetched_at,
        }
    }
}
