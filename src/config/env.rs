//! # Environment Settings
//!
//! Logging switches that are read from the environment rather than flags.
//!
//! | Variable     | Meaning                                  | Default |
//! |--------------|------------------------------------------|---------|
//! | `DEBUG`      | Enable debug level logging               | `false` |
//! | `LOG_FORMAT` | `json` for structured output, else text  | `json`  |

use super::ConfigError;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Text,
    #[default]
    Json,
}

/// Logging configuration read from the environment
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSettings {
    /// Debug level logging
    pub debug: bool,
    /// Output format
    pub format: LogFormat,
}

impl LogSettings {
    /// Load settings from environment variables with defaults
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidDebug`] when `DEBUG` is set but not a boolean
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_values(
            std::env::var("DEBUG").ok().as_deref(),
            std::env::var("LOG_FORMAT").ok().as_deref(),
        )
    }

    fn from_values(debug: Option<&str>, format: Option<&str>) -> Result<Self, ConfigError> {
        let debug = match debug {
            None | Some("") => false,
            Some(value) => {
                parse_bool(value).ok_or_else(|| ConfigError::InvalidDebug(value.to_string()))?
            }
        };
        let format = match format {
            None | Some("") => LogFormat::Json,
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(_) => LogFormat::Text,
        };
        Ok(Self { debug, format })
    }
}

/// Parse a boolean the way `strconv.ParseBool` style flags are usually written
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
