//! Fixed values for the Wikimedia pageviews source and its destination table.

pub const DEFAULT_BASE_URL: &str = "https://dumps.wikimedia.org";

/// The dumps are published with a delay, so runs look one day back by default.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;

pub const DEFAULT_PROJECT: &str = "en.wikipedia.org";

pub const TABLE_NAME: &str = "wiki_pageviews";

/// One row per `(project, dt_hour)` whose load finished.
pub const LOADS_TABLE_NAME: &str = "wiki_pageviews_loads";

/// Format used for `dt_hour` and `fetched_at` when written to the store (UTC).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Suffix for the in-flight download before it is renamed into place.
pub const PARTIAL_SUFFIX: &str = "part";
