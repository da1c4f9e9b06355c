use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_DIR_ENV: &str = "PAGEVIEWS_LOG_DIR";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Console output plus a daily-rotated JSON file under `log_dir`.
///
/// `RUST_LOG` overrides the default `wiki_pageviews=info` filter. Hold the
/// returned guard until exit; dropping it flushes buffered file lines.
#[must_use = "dropping the guard stops file logging"]
pub fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let (file_layer, guard) = match fs::create_dir_all(log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "pageviews.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        Err(e) => {
            eprintln!("Could not create log directory {}: {}", log_dir.display(), e);
            (None, None)
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wiki_pageviews=info,info"));

    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    guard
}

/// Log directory from `PAGEVIEWS_LOG_DIR`, else `logs`.
pub fn log_dir_from_env() -> std::path::PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(Into::into)
        .unwrap_or_else(|_| DEFAULT_LOG_DIR.into())
}
