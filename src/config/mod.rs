//! # Configuration
//!
//! Runtime configuration for the tagger.
//!
//! - [`Config`] is the immutable tagging configuration shared by every event handler
//! - [`cli::Args`] parses command-line flags and turns them into a [`Config`]
//! - [`env::LogSettings`] carries the environment-only logging switches
//!
//! The parsing helpers for the `key=value` and JSON tag formats live here too,
//! since both the default-tags flag and the per-PVC tags annotation use them.

pub mod cli;
pub mod env;

pub use cli::{Args, LeaseSettings, RuntimeSettings};
pub use env::{LogFormat, LogSettings};

use crate::constants::{DEFAULT_ANNOTATION_PREFIX, LEGACY_ANNOTATION_PREFIX};
use crate::tags::Tags;
use thiserror::Error;
use tracing::error;

/// Errors raised while assembling the configuration at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse default tags as JSON: {0}")]
    InvalidDefaultTags(#[source] serde_json::Error),
    #[error("invalid AWS region: {0}")]
    InvalidRegion(String),
    #[error("failed to load Kubernetes configuration: {0}")]
    Kubeconfig(String),
    #[error("failed to parse DEBUG environment variable: {0:?}")]
    InvalidDebug(String),
    #[error("unable to get lease lock resource name (missing lease-lock-name flag)")]
    MissingLeaseLockName,
    #[error("unable to get lease lock resource namespace (missing lease-lock-namespace flag)")]
    MissingLeaseNamespace,
}

/// Serialization format of tag strings (default-tags flag and tags annotation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TagFormat {
    /// JSON object of string values, e.g. `{"team":"a"}`
    #[default]
    Json,
    /// Comma separated `key=value` pairs, e.g. `team=a,env=prod`
    Csv,
}

/// Cloud the tagger is running against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum Cloud {
    #[default]
    Aws,
    Gcp,
    Azure,
}

impl Cloud {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::Azure => "azure",
        }
    }
}

impl std::fmt::Display for Cloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagging configuration
///
/// Built once at startup and shared read-only (behind an `Arc`) by every handler.
#[derive(Debug, Clone)]
pub struct Config {
    /// Tags applied to every volume before labels and annotations
    pub default_tags: Tags,
    /// Prefix for the `<prefix>/tags` and `<prefix>/ignore` annotations
    pub annotation_prefix: String,
    /// Format of the tags annotation
    pub tag_format: TagFormat,
    /// Skip the reserved tag name check
    pub allow_all_tags: bool,
    /// PVC labels copied onto the volume; `["*"]` copies every label
    pub copy_labels: Vec<String>,
    /// Active cloud
    pub cloud: Cloud,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_tags: Tags::new(),
            annotation_prefix: DEFAULT_ANNOTATION_PREFIX.to_string(),
            tag_format: TagFormat::default(),
            allow_all_tags: false,
            copy_labels: Vec::new(),
            cloud: Cloud::default(),
        }
    }
}

impl Config {
    /// Whether the legacy `aws-ebs-tagger/*` annotations are honoured
    #[must_use]
    pub fn uses_default_prefix(&self) -> bool {
        self.annotation_prefix == DEFAULT_ANNOTATION_PREFIX
    }

    /// Full annotation name for `suffix` under the configured prefix
    #[must_use]
    pub fn annotation(&self, suffix: &str) -> String {
        format!("{}/{suffix}", self.annotation_prefix)
    }

    /// Full annotation name for `suffix` under the legacy prefix
    #[must_use]
    pub fn legacy_annotation(suffix: &str) -> String {
        format!("{LEGACY_ANNOTATION_PREFIX}/{suffix}")
    }

    /// Whether the PVC label `key` should be copied onto the volume
    #[must_use]
    pub fn copies_label(&self, key: &str) -> bool {
        match self.copy_labels.first() {
            Some(first) if first == "*" => true,
            Some(_) => self.copy_labels.iter().any(|label| label == key),
            None => false,
        }
    }
}

/// Parse a comma separated `key=value` list
///
/// Empty segments are skipped. Each pair is split on the first `=` and both
/// halves are trimmed; pairs with an empty key or value are logged and dropped.
#[must_use]
pub fn parse_csv(value: &str) -> Tags {
    let mut tags = Tags::new();
    for pair in value.split(',') {
        if pair.is_empty() {
            continue;
        }
        let Some((key, val)) = pair.split_once('=') else {
            error!(pair = pair, "Invalid tag pair, expected key=value");
            continue;
        };
        let (key, val) = (key.trim(), val.trim());
        if key.is_empty() || val.is_empty() {
            error!(pair = pair, "Invalid tag pair, key and value must be non-empty");
            continue;
        }
        tags.insert(key.to_string(), val.to_string());
    }
    tags
}

/// Parse the `--copy-labels` flag value
///
/// `"*"` means every label. Otherwise the value is split on commas and empty
/// entries are dropped.
#[must_use]
pub fn parse_copy_labels(value: &str) -> Vec<String> {
    if value == "*" {
        return vec!["*".to_string()];
    }
    value
        .split(',')
        .filter(|label| !label.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parse a tag string in the given format
///
/// CSV parsing never fails (bad pairs are skipped). JSON must be an object of
/// string values; any decode error rejects the whole string.
///
/// # Errors
/// Returns the JSON decode error for malformed JSON input
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn parse_tag_string(value: &str, format: TagFormat) -> Result<Tags, serde_json::Error> {
    match format {
        TagFormat::Csv => Ok(parse_csv(value)),
        TagFormat::Json => serde_json::from_str(value),
    }
}
