use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use crate::error::{Error, Result};

/// OSC/UDP endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OscConfig {
    /// Address the command socket binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Command port the bridge listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port on the client host that replies and monitor data are sent to.
    ///
    /// `null` sends replies back to the datagram's source port.
    #[serde(default = "default_return_port")]
    pub return_port: Option<u16>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_return_port() -> Option<u16> {
    Some(9999)
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            return_port: default_return_port(),
        }
    }
}

impl OscConfig {
    /// Resolve the socket address the command socket binds to.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid OSC host '{}': {}", self.host, e)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Base configuration shared by all bridges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaseConfig {
    /// OSC endpoint settings.
    #[serde(default)]
    pub osc: OscConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_config() {
        let json5 = r#"
        {
            osc: {
                host: "127.0.0.1",
                port: 9000,
                return_port: 9001,
            },
            logging: {
                level: "debug",
            },
        }
        "#;

        let config: BaseConfig = parse_config(json5).unwrap();

        assert_eq!(config.osc.host, "127.0.0.1");
        assert_eq!(config.osc.port, 9000);
        assert_eq!(config.osc.return_port, Some(9001));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_default_config() {
        let json5 = "{}";
        let config: BaseConfig = parse_config(json5).unwrap();

        assert_eq!(config.osc.host, "0.0.0.0");
        assert_eq!(config.osc.port, 8888);
        assert_eq!(config.osc.return_port, Some(9999));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_null_return_port() {
        let config: BaseConfig = parse_config("{ osc: { return_port: null } }").unwrap();
        assert_eq!(config.osc.return_port, None);
    }

    #[test]
    fn test_bind_addr() {
        let osc = OscConfig {
            host: "127.0.0.1".to_string(),
            port: 7000,
            return_port: None,
        };
        assert_eq!(osc.bind_addr().unwrap(), "127.0.0.1:7000".parse().unwrap());

        let bad = OscConfig {
            host: "not-an-ip".to_string(),
            ..OscConfig::default()
        };
        assert!(matches!(bad.bind_addr(), Err(Error::Config(_))));
    }

    #[test]
    fn test_json_logging_format() {
        let json5 = r#"
        {
            logging: {
                level: "debug",
                format: "json",
            },
        }
        "#;

        let config: BaseConfig = parse_config(json5).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
