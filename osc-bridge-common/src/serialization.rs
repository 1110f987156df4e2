use serde::Serialize;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Payload format for data pushed to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Typed OSC positional arguments (default).
    #[default]
    Osc,

    /// A single JSON string argument.
    Json,

    /// A single space-separated, newline-terminated string argument.
    Text,
}

impl OutputFormat {
    /// Get the wire name for this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Osc => "osc",
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "osc" => Ok(OutputFormat::Osc),
            "json" => Ok(OutputFormat::Json),
            "text" => Ok(OutputFormat::Text),
            other => Err(Error::Config(format!(
                "unknown format '{}' (use osc, json, or text)",
                other
            ))),
        }
    }
}

/// Encode a value as a compact JSON string.
pub fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Error::from)
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Get the current timestamp in fractional seconds since Unix epoch.
pub fn current_timestamp_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!("osc".parse::<OutputFormat>().unwrap(), OutputFormat::Osc);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("csv".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_format_default_and_serde() {
        assert_eq!(OutputFormat::default(), OutputFormat::Osc);
        let format: OutputFormat = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(format, OutputFormat::Text);
        assert_eq!(format.to_string(), "text");
    }

    #[test]
    fn test_encode_json() {
        let encoded = encode_json(&serde_json::json!({ "laps": 2 })).unwrap();
        assert_eq!(encoded, "{\"laps\":2}");
    }

    #[test]
    fn test_timestamps_are_consistent() {
        let millis = current_timestamp_millis();
        let secs = current_timestamp_secs();
        assert!(millis > 0);
        assert!((secs * 1000.0 - millis as f64).abs() < 5_000.0);
    }
}
