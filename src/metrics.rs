//! Prometheus recorder for pipeline runs.
//!
//! A run is a short-lived job, so metrics are rendered once at the end and
//! pushed to a Pushgateway instead of being scraped.

use anyhow::{bail, Context};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::{debug, info};

pub const JOB_NAME: &str = "wiki_pageviews";
pub const PUSHGATEWAY_ENV: &str = "PAGEVIEWS_PUSHGATEWAY_URL";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global recorder. Calling it again is a no-op.
pub fn init_metrics() -> anyhow::Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    if METRICS_HANDLE.set(handle).is_err() {
        debug!("Metrics recorder was installed concurrently");
    }
    describe();
    Ok(())
}

fn describe() {
    describe_counter!("pageviews_runs_total", "Pipeline runs by terminal outcome");
    describe_counter!(
        "pageviews_fetch_errors_total",
        "Snapshot downloads that failed, by error kind"
    );
    describe_histogram!(
        "pageviews_fetch_bytes",
        Unit::Bytes,
        "Size of each downloaded snapshot"
    );
    describe_counter!("pageviews_rows_parsed_total", "Rows read from snapshots");
    describe_counter!(
        "pageviews_rows_loaded_total",
        "Rows committed to the destination table"
    );
    describe_histogram!(
        "pageviews_stage_duration_seconds",
        Unit::Seconds,
        "Wall time spent in each pipeline stage"
    );
}

/// Current metrics in Prometheus text format, if the recorder is installed.
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

pub fn push_url(gateway: &str, instance: &str) -> String {
    format!(
        "{}/metrics/job/{}/instance/{}",
        gateway.trim_end_matches('/'),
        JOB_NAME,
        instance
    )
}

pub async fn push_to_pushgateway(gateway: &str, instance: &str) -> anyhow::Result<()> {
    let Some(body) = render() else {
        bail!("metrics recorder is not installed");
    };
    let url = push_url(gateway, instance);

    let response = reqwest::Client::new()
        .post(&url)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .send()
        .await
        .with_context(|| format!("failed to reach Pushgateway at {url}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        bail!("Pushgateway returned status {}: {}", status, text);
    }

    info!("Pushed metrics to Pushgateway for instance={}", instance);
    Ok(())
}
