//! Core types and the backend trait for serial streams.
//!
//! [`PortConfiguration`] is the portable description of a line; [`SerialBackend`]
//! is the seam between the portable [`SerialStream`](super::SerialStream) façade
//! and a platform I/O adapter (termios, overlapped COM handles, or the mock).

use crate::error::SerialResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Baud rate used when none is given.
pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// Number of bytes requested by `receive_some` when no maximum is given.
pub const DEFAULT_RECEIVE_SIZE: usize = 4096;

/// Largest single receive; bigger requests are clamped to it.
pub const MAX_RECEIVE_SIZE: usize = 1 << 20;

/// Break length used by callers that have no better idea.
pub const DEFAULT_BREAK_DURATION: Duration = Duration::from_millis(250);

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
    /// Parity bit always 1.
    Mark,
    /// Parity bit always 0.
    Space,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

/// Modem control and status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModemLine {
    /// Clear To Send (input).
    Cts,
    /// Request To Send (output).
    Rts,
    /// Data Terminal Ready (output).
    Dtr,
    /// Data Set Ready (input).
    Dsr,
    /// Carrier Detect (input).
    Cd,
    /// Ring Indicator (input).
    Ri,
}

impl ModemLine {
    /// Whether this line is driven by us rather than by the peer.
    pub fn is_output(self) -> bool {
        matches!(self, Self::Rts | Self::Dtr)
    }
}

/// Which direction of buffered data to throw away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Input,
    Output,
}

/// Configuration parameters for a serial port.
///
/// Values are not validated here: whether a combination is representable
/// depends on the platform, so the backend codecs reject what they cannot
/// encode instead of silently downgrading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfiguration {
    /// Port identifier, e.g. `/dev/ttyUSB0` or `COM7`.
    pub port: String,

    /// Lock the port for exclusive use.
    pub exclusive: bool,

    /// Baud rate (bits per second).
    pub baudrate: u32,

    /// Bits per byte, 5 to 8.
    pub bytesize: u8,

    pub parity: Parity,

    pub stopbits: StopBits,

    /// Software flow control (XON/XOFF).
    pub xonxoff: bool,

    /// Hardware flow control (RTS/CTS).
    pub rtscts: bool,

    /// Lower the modem control lines when the last descriptor is closed.
    pub hangup: bool,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            port: String::new(),
            exclusive: false,
            baudrate: DEFAULT_BAUDRATE,
            bytesize: 8,
            parity: Parity::None,
            stopbits: StopBits::One,
            xonxoff: false,
            rtscts: false,
            hangup: true,
        }
    }
}

impl PortConfiguration {
    /// Configuration for `port` with 115200 8N1, no flow control.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    #[must_use]
    pub fn baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }

    #[must_use]
    pub fn bytesize(mut self, bytesize: u8) -> Self {
        self.bytesize = bytesize;
        self
    }

    #[must_use]
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    #[must_use]
    pub fn stopbits(mut self, stopbits: StopBits) -> Self {
        self.stopbits = stopbits;
        self
    }

    #[must_use]
    pub fn xonxoff(mut self, xonxoff: bool) -> Self {
        self.xonxoff = xonxoff;
        self
    }

    #[must_use]
    pub fn rtscts(mut self, rtscts: bool) -> Self {
        self.rtscts = rtscts;
        self
    }

    #[must_use]
    pub fn hangup(mut self, hangup: bool) -> Self {
        self.hangup = hangup;
        self
    }
}

/// Line settings as read back from an encoded control structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub bytesize: u8,
    pub parity: Parity,
    pub stopbits: StopBits,
    pub xonxoff: bool,
    pub rtscts: bool,
    pub hangup: bool,
}

impl From<&PortConfiguration> for LineSettings {
    fn from(config: &PortConfiguration) -> Self {
        Self {
            bytesize: config.bytesize,
            parity: config.parity,
            stopbits: config.stopbits,
            xonxoff: config.xonxoff,
            rtscts: config.rtscts,
            hangup: config.hangup,
        }
    }
}

/// Platform I/O adapter behind a [`SerialStream`](super::SerialStream).
///
/// A backend owns at most one OS resource. All methods take `&self` so that
/// one task may send while another receives; the façade's conflict guards make
/// sure there is never more than one sender or one receiver at a time.
///
/// Only [`wait_writable`](Self::wait_writable), [`send`](Self::send),
/// [`receive`](Self::receive) and [`send_break`](Self::send_break) may suspend.
#[async_trait]
pub trait SerialBackend: Send + Sync + std::fmt::Debug {
    /// Whether an OS resource is currently held.
    fn is_open(&self) -> bool;

    /// Acquire the OS resource and apply `config` unconditionally.
    ///
    /// On failure nothing stays allocated.
    fn open(&self, config: &PortConfiguration) -> SerialResult<()>;

    /// Release the OS resource without waking anyone. Does nothing when already closed.
    ///
    /// This is the drop path: no task can be suspended on a resource whose
    /// owner is going away.
    fn close(&self) -> SerialResult<()>;

    /// Wake tasks suspended on the resource with a closed-resource error, then
    /// release it. Returns only once the OS resource is gone, so the device can
    /// be reopened (and relocked) immediately. Does nothing when already closed.
    async fn aclose(&self) -> SerialResult<()>;

    /// Re-apply `config` to the open resource. Does nothing when closed.
    fn reconfigure(&self, config: &PortConfiguration, force: bool) -> SerialResult<()>;

    /// Discard buffered data in one direction.
    fn discard(&self, queue: Queue) -> SerialResult<()>;

    /// Hold the line in the break condition for `duration`.
    async fn send_break(&self, duration: Duration) -> SerialResult<()>;

    /// Suspend until a write might not block.
    async fn wait_writable(&self) -> SerialResult<()>;

    /// Write some of `data`, returning how many bytes were taken.
    async fn send(&self, data: &[u8]) -> SerialResult<usize>;

    /// Receive up to `max_bytes` bytes. An empty buffer means end of stream.
    async fn receive(&self, max_bytes: usize) -> SerialResult<Vec<u8>>;

    /// Read a modem line.
    fn modem_line(&self, line: ModemLine) -> SerialResult<bool>;

    /// Drive an output modem line.
    fn set_modem_line(&self, line: ModemLine, value: bool) -> SerialResult<()>;

    /// Hangup-on-close state as the OS reports it.
    fn hangup(&self) -> SerialResult<bool>;

    /// Baud rate as the OS reports it.
    fn baudrate(&self) -> SerialResult<u32>;
}
