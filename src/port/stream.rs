//! The portable serial stream.

use super::conflict::ConflictDetector;
use super::platform::{backend_for, Platform};
use super::traits::{
    ModemLine, PortConfiguration, Queue, SerialBackend, DEFAULT_RECEIVE_SIZE, MAX_RECEIVE_SIZE,
};
use crate::error::{SerialError, SerialResult};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// An asynchronous byte stream over a serial port.
///
/// The stream is created closed; [`aopen`](Self::aopen) acquires the port and
/// applies the configuration, [`aclose`](Self::aclose) releases it. Every other
/// operation fails with [`SerialError::ClosedResource`] while closed.
///
/// One task may send while another receives. Two concurrent sends (or two
/// concurrent receives) are a usage error and the second one fails with
/// [`SerialError::Conflict`].
///
/// Dropping an open stream closes the port without waking waiters; call
/// [`aclose`](Self::aclose) for an orderly shutdown.
///
/// # Example
/// ```no_run
/// use serial_stream::{PortConfiguration, SerialStream};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let stream = SerialStream::new(PortConfiguration::new("/dev/ttyUSB0").baudrate(9600))?;
/// stream.aopen().await?;
/// stream.send_all(b"AT\r\n").await?;
/// let reply = stream.receive_some(None).await?;
/// println!("{}", String::from_utf8_lossy(&reply));
/// stream.aclose().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SerialStream {
    config: Mutex<PortConfiguration>,
    backend: Box<dyn SerialBackend>,
    send_conflict: ConflictDetector,
    recv_conflict: ConflictDetector,
}

impl SerialStream {
    /// Create a closed stream using the backend for the running platform.
    pub fn new(config: PortConfiguration) -> SerialResult<Self> {
        Self::with_platform(config, Platform::current())
    }

    /// Create a closed stream using the backend for `platform`.
    pub fn with_platform(config: PortConfiguration, platform: Platform) -> SerialResult<Self> {
        let backend = backend_for(platform, &config.port)?;
        Ok(Self::with_backend(config, backend))
    }

    /// Create a closed stream on top of an explicit backend.
    pub fn with_backend(config: PortConfiguration, backend: Box<dyn SerialBackend>) -> Self {
        Self {
            config: Mutex::new(config),
            backend,
            send_conflict: ConflictDetector::new(
                "Another task is currently sending data on this SerialStream",
            ),
            recv_conflict: ConflictDetector::new(
                "Another task is currently receiving data on this SerialStream",
            ),
        }
    }

    /// Port identifier.
    pub fn port(&self) -> String {
        self.config.lock().port.clone()
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> PortConfiguration {
        self.config.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_open()
    }

    /// Open the port and configure it.
    ///
    /// Fails with [`SerialError::AlreadyOpen`] if the stream is open already;
    /// the existing resource is left untouched in that case.
    pub async fn aopen(&self) -> SerialResult<()> {
        let config = self.config();
        if self.backend.is_open() {
            return Err(SerialError::AlreadyOpen(config.port));
        }

        self.backend.open(&config)?;
        info!(
            port = %config.port,
            baudrate = config.baudrate,
            bytesize = config.bytesize,
            parity = ?config.parity,
            stopbits = ?config.stopbits,
            "Serial port opened"
        );
        Ok(())
    }

    /// Close the port, waking any task suspended on it. Does nothing if already closed.
    pub async fn aclose(&self) -> SerialResult<()> {
        if !self.backend.is_open() {
            return Ok(());
        }
        self.backend.aclose().await?;
        info!(port = %self.port(), "Serial port closed");
        Ok(())
    }

    /// Discard any unread input.
    pub fn discard_input(&self) -> SerialResult<()> {
        self.backend.discard(Queue::Input)
    }

    /// Discard any unwritten output.
    pub fn discard_output(&self) -> SerialResult<()> {
        self.backend.discard(Queue::Output)
    }

    /// Transmit a continuous stream of zero bits for `duration`.
    pub async fn send_break(&self, duration: Duration) -> SerialResult<()> {
        self.backend.send_break(duration).await
    }

    /// Receive between 1 and `max_bytes` bytes (4096 when `None` or zero,
    /// at most [`MAX_RECEIVE_SIZE`]).
    ///
    /// An empty result means the peer hung up.
    pub async fn receive_some(&self, max_bytes: Option<usize>) -> SerialResult<Vec<u8>> {
        let _guard = self.recv_conflict.enter()?;
        let max_bytes = max_bytes
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_RECEIVE_SIZE)
            .min(MAX_RECEIVE_SIZE);
        let data = self.backend.receive(max_bytes).await?;
        if data.is_empty() {
            debug!(port = %self.port(), "End of stream");
        }
        Ok(data)
    }

    /// Send all of `data`, retrying partial writes until everything is taken.
    ///
    /// An empty `data` still yields to the scheduler once.
    pub async fn send_all(&self, data: &[u8]) -> SerialResult<()> {
        let _guard = self.send_conflict.enter()?;
        if data.is_empty() {
            tokio::task::yield_now().await;
            if !self.backend.is_open() {
                return Err(SerialError::closed(self.port()));
            }
            return Ok(());
        }

        let mut total_sent = 0;
        while total_sent < data.len() {
            self.backend.wait_writable().await?;
            let sent = self.backend.send(&data[total_sent..]).await?;
            total_sent += sent;
            if total_sent < data.len() {
                trace!(sent, remaining = data.len() - total_sent, "Partial write");
            }
        }
        Ok(())
    }

    /// Wait until sending might not block. A following `send_all` may still block.
    pub async fn wait_send_all_might_not_block(&self) -> SerialResult<()> {
        let _guard = self.send_conflict.enter()?;
        self.backend.wait_writable().await
    }

    /// Current *Clear To Send* state.
    pub fn get_cts(&self) -> SerialResult<bool> {
        self.backend.modem_line(ModemLine::Cts)
    }

    /// Current *Request To Send* state.
    pub fn get_rts(&self) -> SerialResult<bool> {
        self.backend.modem_line(ModemLine::Rts)
    }

    /// Set *Request To Send*.
    pub fn set_rts(&self, value: bool) -> SerialResult<()> {
        self.backend.set_modem_line(ModemLine::Rts, value)
    }

    /// Current *Data Terminal Ready* state.
    pub fn get_dtr(&self) -> SerialResult<bool> {
        self.backend.modem_line(ModemLine::Dtr)
    }

    /// Set *Data Terminal Ready*.
    pub fn set_dtr(&self, value: bool) -> SerialResult<()> {
        self.backend.set_modem_line(ModemLine::Dtr, value)
    }

    /// Current *Data Set Ready* state.
    pub fn get_dsr(&self) -> SerialResult<bool> {
        self.backend.modem_line(ModemLine::Dsr)
    }

    /// Current *Carrier Detect* state.
    pub fn get_cd(&self) -> SerialResult<bool> {
        self.backend.modem_line(ModemLine::Cd)
    }

    /// Current *Ring Indicator* state.
    pub fn get_ri(&self) -> SerialResult<bool> {
        self.backend.modem_line(ModemLine::Ri)
    }

    /// Current *Hangup on Close* state as reported by the OS.
    pub fn get_hangup(&self) -> SerialResult<bool> {
        self.backend.hangup()
    }

    /// Set *Hangup on Close*.
    pub fn set_hangup(&self, value: bool) -> SerialResult<()> {
        self.reconfigure(|config| config.hangup = value)
    }

    /// Baud rate as reported by the OS.
    pub fn get_baudrate(&self) -> SerialResult<u32> {
        self.backend.baudrate()
    }

    /// Change configuration fields and re-apply them to an open port.
    ///
    /// The change is kept only if the backend accepts it. On a closed stream the
    /// change is stored and applied by the next `aopen`.
    pub fn reconfigure<F>(&self, update: F) -> SerialResult<()>
    where
        F: FnOnce(&mut PortConfiguration),
    {
        let mut config = self.config.lock();
        let mut next = config.clone();
        update(&mut next);

        if next.port != config.port {
            return Err(SerialError::configuration(
                "port",
                "the port identifier is fixed for the lifetime of a stream",
            ));
        }
        if next == *config {
            return Ok(());
        }

        self.backend.reconfigure(&next, false)?;
        debug!(port = %next.port, "Configuration updated");
        *config = next;
        Ok(())
    }
}

impl Drop for SerialStream {
    fn drop(&mut self) {
        if self.backend.is_open() {
            if let Err(e) = self.backend.close() {
                warn!(port = %self.config.get_mut().port, "Failed to close serial port on drop: {}", e);
            }
        }
    }
}
