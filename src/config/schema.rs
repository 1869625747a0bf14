//! The `[serial]` and `[logging]` tables. Every field has a default, so a
//! partial file (or none at all) is valid.

use super::error::{ConfigError, ConfigResult};
use crate::port::{Parity, PortConfiguration, StopBits, DEFAULT_BAUDRATE, DEFAULT_RECEIVE_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values that the type system cannot.
    pub fn validate(&self) -> ConfigResult<()> {
        self.serial.validate()?;
        self.logging.validate()
    }
}

/// Serial line section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port to open when none is given on the command line (a path or an alias)
    pub port: Option<String>,
    pub baudrate: u32,
    pub bytesize: u8,
    pub parity: Parity,
    pub stopbits: StopBits,
    pub xonxoff: bool,
    pub rtscts: bool,
    pub exclusive: bool,
    pub hangup: bool,
    /// Maximum bytes per receive call
    pub receive_size: usize,
    /// Break length in milliseconds
    pub break_ms: u64,
    /// Friendly names for device paths
    #[serde(default)]
    pub port_aliases: BTreeMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let line = PortConfiguration::default();
        Self {
            port: None,
            baudrate: DEFAULT_BAUDRATE,
            bytesize: line.bytesize,
            parity: line.parity,
            stopbits: line.stopbits,
            xonxoff: line.xonxoff,
            rtscts: line.rtscts,
            exclusive: line.exclusive,
            hangup: line.hangup,
            receive_size: DEFAULT_RECEIVE_SIZE,
            break_ms: 250,
            port_aliases: BTreeMap::new(),
        }
    }
}

impl SerialConfig {
    /// Map an alias to its device path; other names pass through.
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub fn break_duration(&self) -> Duration {
        Duration::from_millis(self.break_ms)
    }

    /// Build the line configuration for `port`, falling back to the configured port.
    pub fn port_configuration(&self, port: Option<&str>) -> ConfigResult<PortConfiguration> {
        let name = port
            .or(self.port.as_deref())
            .ok_or(ConfigError::NoPort)?;

        Ok(PortConfiguration {
            port: self.resolve_port(name),
            exclusive: self.exclusive,
            baudrate: self.baudrate,
            bytesize: self.bytesize,
            parity: self.parity,
            stopbits: self.stopbits,
            xonxoff: self.xonxoff,
            rtscts: self.rtscts,
            hangup: self.hangup,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.baudrate == 0 {
            return Err(ConfigError::invalid(
                "serial.baudrate",
                "must be a positive number",
            ));
        }
        if !(5..=8).contains(&self.bytesize) {
            return Err(ConfigError::invalid(
                "serial.bytesize",
                format!("{} is not one of 5, 6, 7, 8", self.bytesize),
            ));
        }
        if self.receive_size == 0 {
            return Err(ConfigError::invalid(
                "serial.receive_size",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive: "trace", "debug", "info", "warn", "error" or a full EnvFilter string
    pub level: String,
    /// Log format: "pretty" or "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.level.trim().is_empty() {
            return Err(ConfigError::invalid("logging.level", "must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line output with colors
    Pretty,
    /// Single-line output
    #[default]
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.baudrate, 115200);
        assert_eq!(config.serial.bytesize, 8);
        assert!(config.serial.hangup);
        assert_eq!(config.serial.port, None);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_alias_resolution() {
        let mut config = SerialConfig::default();
        config
            .port_aliases
            .insert("gps".to_string(), "/dev/ttyUSB0".to_string());

        assert_eq!(config.resolve_port("gps"), "/dev/ttyUSB0");
        assert_eq!(config.resolve_port("COM5"), "COM5");
    }

    #[test]
    fn test_port_configuration() {
        let mut config = SerialConfig {
            port: Some("modem".to_string()),
            baudrate: 9600,
            parity: Parity::Even,
            ..Default::default()
        };
        config
            .port_aliases
            .insert("modem".to_string(), "/dev/ttyS1".to_string());

        let line = config.port_configuration(None).unwrap();
        assert_eq!(line.port, "/dev/ttyS1");
        assert_eq!(line.baudrate, 9600);
        assert_eq!(line.parity, Parity::Even);

        let line = config.port_configuration(Some("/dev/ttyACM0")).unwrap();
        assert_eq!(line.port, "/dev/ttyACM0");
    }

    #[test]
    fn test_missing_port() {
        let err = SerialConfig::default().port_configuration(None).unwrap_err();
        assert!(matches!(err, ConfigError::NoPort));
    }

    #[test]
    fn test_validation() {
        let config = SerialConfig {
            bytesize: 9,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));

        let config = SerialConfig {
            baudrate: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_serialize() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("[serial]"));
        assert!(text.contains("hangup = true"));
        assert!(text.contains("[logging]"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let text = r#"
            [serial]
            port = "/dev/ttyUSB0"
            baudrate = 9600
            stopbits = "two"

            [serial.port_aliases]
            plc = "/dev/ttyS4"
        "#;

        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.serial.baudrate, 9600);
        assert_eq!(config.serial.stopbits, StopBits::Two);
        assert_eq!(config.serial.resolve_port("plc"), "/dev/ttyS4");
        assert_eq!(config.logging.level, "warn");
    }
}
