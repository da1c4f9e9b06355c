pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod journal;
pub mod load;
pub mod logging;
pub mod metrics;
pub mod parse;
pub mod pipeline;
pub mod schema;
pub mod snapshot;
pub mod staging;
pub mod store;
pub mod transform;
pub mod verify;

pub use crate::config::Config;
pub use crate::error::{PipelineError, Stage};
pub use crate::pipeline::{Pipeline, RunOutcome, RunReport};
