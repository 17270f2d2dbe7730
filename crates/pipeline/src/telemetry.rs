//! Diagnostic logging setup

use crate::PipelineError;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install the global `tracing` subscriber
pub fn init_logging(level: Level, json: bool) -> Result<(), PipelineError> {
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    result.map_err(|e| PipelineError::Config(format!("failed to set tracing subscriber: {}", e)))
}
