//! Error types for serial stream operations.
//!
//! Every fallible operation in the crate returns [`SerialResult`]. The variants
//! separate usage errors (conflicts, closed streams) from configuration the
//! platform cannot represent and from failed OS calls.

use std::io;
use thiserror::Error;

/// Errors that can occur while opening, configuring or using a serial stream.
#[derive(Debug, Error)]
pub enum SerialError {
    /// The requested line parameters cannot be represented on this platform.
    #[error("Invalid {field}: {message}")]
    Configuration {
        /// Name of the offending configuration field.
        field: &'static str,
        /// Human readable reason.
        message: String,
    },

    /// The stream has no live OS resource, or it was closed while a task waited on it.
    #[error("Closed resource: {0}")]
    ClosedResource(String),

    /// Another task is already sending (or receiving) on this stream.
    #[error("{0}")]
    Conflict(&'static str),

    /// An OS call failed.
    #[error("{call} failed on {port}: {source}")]
    Platform {
        /// Name of the failing call, e.g. `tcsetattr`.
        call: &'static str,
        /// Port identifier the call was made for.
        port: String,
        #[source]
        source: io::Error,
    },

    /// `aopen` was called on a stream that is already open.
    #[error("Port {0} is already open")]
    AlreadyOpen(String),

    /// The port could not be locked for exclusive use; someone else holds it.
    #[error("Could not exclusively lock port {port}: {source}")]
    ExclusiveAccess {
        port: String,
        #[source]
        source: io::Error,
    },

    /// No backend for the requested platform is compiled into this build.
    #[error("Platform {0} is not supported by this build")]
    UnsupportedPlatform(String),
}

impl SerialError {
    /// Create a configuration error for `field`.
    pub fn configuration(field: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            message: message.into(),
        }
    }

    /// Create a closed-resource error naming the port.
    pub fn closed(port: impl AsRef<str>) -> Self {
        Self::ClosedResource(format!("port {} is closed", port.as_ref()))
    }

    /// Wrap an OS error raised by `call`.
    pub fn platform(call: &'static str, port: impl Into<String>, source: io::Error) -> Self {
        Self::Platform {
            call,
            port: port.into(),
            source,
        }
    }

    /// Wrap the calling thread's last OS error raised by `call`.
    pub fn last_os_error(call: &'static str, port: impl Into<String>) -> Self {
        Self::platform(call, port, io::Error::last_os_error())
    }

    /// Whether this is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Whether this error reports a closed stream.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedResource(_))
    }

    /// Whether this error reports a send/receive conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result type for serial stream operations.
pub type SerialResult<T> = Result<T, SerialError>;
