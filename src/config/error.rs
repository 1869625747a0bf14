//! Errors raised while locating, parsing or writing the configuration file.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly named file does not exist
    #[error("no configuration file at {}", .0.display())]
    Missing(PathBuf),

    /// Reading, writing or creating the directory for a file failed
    #[error("cannot {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot encode configuration as TOML: {0}")]
    Encode(#[from] toml::ser::Error),

    /// A setting parsed but cannot describe a serial line
    #[error("{key}: {message}")]
    Invalid { key: &'static str, message: String },

    /// A `SERIAL_STREAM_*` override could not be parsed
    #[error("{var}={value:?} is not valid: {message}")]
    Env {
        var: String,
        value: String,
        message: &'static str,
    },

    /// No port on the command line and none in the file
    #[error("no serial port given and serial.port is not set")]
    NoPort,

    /// `save` on a loader that was not loaded from a file
    #[error("configuration has no file to save to")]
    NoPath,
}

impl ConfigError {
    pub fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }

    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
