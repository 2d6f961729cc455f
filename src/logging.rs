//! # Logging
//!
//! tracing-subscriber setup. `RUST_LOG` wins when set; otherwise the level is
//! `info`, or `debug` when `DEBUG` is true.

use crate::config::{LogFormat, LogSettings};
use anyhow::Result;
use tracing_subscriber::EnvFilter;

fn default_directive(settings: &LogSettings) -> &'static str {
    if settings.debug {
        "k8s_pvc_tagger=debug,info"
    } else {
        "k8s_pvc_tagger=info,warn"
    }
}

/// Install the global subscriber
///
/// # Errors
/// Returns an error if a global subscriber is already installed
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(settings)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match settings.format {
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?,
        LogFormat::Text => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?,
    }
    Ok(())
}
