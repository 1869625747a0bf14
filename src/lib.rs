//! Serial Stream Library
//!
//! Asynchronous serial port streams on top of tokio. A [`SerialStream`] offers
//! the same contract on every platform: open, close, send everything, receive
//! some, modem lines, break and discard. Underneath, a [`SerialBackend`] does
//! the OS work.
//!
//! # Modules
//!
//! - `port`: the portable stream façade, its configuration types, the backend
//!   trait and a mock backend for tests
//! - `posix`: termios codec, baud rate resolution and the readiness-based
//!   backend (unix only)
//! - `windows`: DCB/COMMTIMEOUTS codec (everywhere) and the overlapped COM
//!   backend (Windows only)
//! - `config`: TOML configuration with environment overrides
//! - `error`: unified error type

pub mod config;
pub mod error;
pub mod port;
#[cfg(unix)]
pub mod posix;
pub mod windows;

pub use error::{SerialError, SerialResult};
pub use port::{
    backend_for, LineSettings, MockBackend, ModemLine, Parity, Platform, PortConfiguration, Queue,
    SerialBackend, SerialStream, StopBits, DEFAULT_BAUDRATE, DEFAULT_BREAK_DURATION,
    DEFAULT_RECEIVE_SIZE, MAX_RECEIVE_SIZE,
};

#[cfg(unix)]
pub use posix::{PosixBackend, PosixProfile};
#[cfg(windows)]
pub use windows::WindowsBackend;

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
