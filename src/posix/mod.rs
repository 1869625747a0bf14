//! Termios backend for POSIX systems.
//!
//! The descriptor is opened non-blocking and registered with the tokio reactor
//! through [`AsyncFd`]; every wait races readiness against a close signal so
//! `aclose` can wake suspended senders and receivers.

pub mod baud;
pub mod codec;
pub mod tables;

pub use baud::{BaudSource, CustomRate, PosixProfile, RateTable, ResolvedBaud};
pub use codec::{decode, encode, Encoded, TermiosState};

use crate::error::{SerialError, SerialResult};
use crate::port::{ModemLine, PortConfiguration, Queue, SerialBackend};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// An open descriptor plus the signal that tells waiters it is going away.
///
/// Field order matters: the descriptor is closed before `closing` is dropped,
/// and `aclose` treats the dropped sender as "descriptor released".
struct PortHandle {
    fd: AsyncFd<OwnedFd>,
    closing: watch::Sender<bool>,
}

impl PortHandle {
    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    async fn closed(&self) {
        let mut rx = self.closing.subscribe();
        loop {
            let closed = *rx.borrow_and_update();
            if closed || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Serial backend driving a tty through termios and ioctls.
pub struct PosixBackend {
    port: String,
    profile: PosixProfile,
    handle: Mutex<Option<Arc<PortHandle>>>,
}

impl PosixBackend {
    pub fn new(port: impl Into<String>, profile: PosixProfile) -> Self {
        Self {
            port: port.into(),
            profile,
            handle: Mutex::new(None),
        }
    }

    pub fn profile(&self) -> &PosixProfile {
        &self.profile
    }

    fn handle(&self) -> SerialResult<Arc<PortHandle>> {
        self.handle
            .lock()
            .clone()
            .ok_or_else(|| SerialError::closed(&self.port))
    }

    fn platform_error(&self, call: &'static str, source: io::Error) -> SerialError {
        SerialError::platform(call, self.port.clone(), source)
    }

    fn lock_port(&self, fd: RawFd, exclusive: bool) -> SerialResult<()> {
        if exclusive {
            if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } < 0 {
                return Err(SerialError::ExclusiveAccess {
                    port: self.port.clone(),
                    source: io::Error::last_os_error(),
                });
            }
        } else if unsafe { libc::flock(fd, libc::LOCK_UN) } < 0 {
            return Err(SerialError::last_os_error("flock", self.port.clone()));
        }
        Ok(())
    }

    /// Apply `config` to `fd`, writing the attributes only when they change or `force` is set.
    fn apply(&self, fd: RawFd, config: &PortConfiguration, force: bool) -> SerialResult<()> {
        self.lock_port(fd, config.exclusive)?;

        let mut termios = tcgetattr(fd).map_err(|e| self.platform_error("tcgetattr", e))?;
        let previous = TermiosState::from_termios(&termios);
        let encoded = encode(config, &self.profile, &previous)?;

        if codec::needs_write(&previous, &encoded.state, force) {
            encoded
                .state
                .apply_to(&mut termios)
                .map_err(|e| self.platform_error("cfsetspeed", e))?;
            if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } < 0 {
                return Err(SerialError::last_os_error("tcsetattr", self.port.clone()));
            }
            debug!(port = %self.port, force, "Line settings written");
        } else {
            trace!(port = %self.port, "Line settings unchanged");
        }

        if let Some(rate) = encoded.custom_rate {
            self.profile.apply_custom_rate(fd, rate)?;
            debug!(port = %self.port, rate, "Custom baud rate set");
        }
        Ok(())
    }

    fn modem_bits(&self, fd: RawFd) -> SerialResult<libc::c_int> {
        let mut bits: libc::c_int = 0;
        if unsafe { libc::ioctl(fd, libc::TIOCMGET, &mut bits) } < 0 {
            return Err(SerialError::last_os_error("TIOCMGET", self.port.clone()));
        }
        Ok(bits)
    }
}

impl std::fmt::Debug for PosixBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PosixBackend")
            .field("port", &self.port)
            .field("platform", &self.profile.platform)
            .field("open", &self.is_open())
            .finish()
    }
}

fn tcgetattr(fd: RawFd) -> io::Result<libc::termios> {
    // SAFETY: termios is plain old data; tcgetattr fills it in.
    let mut termios: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut termios) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(termios)
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn modem_mask(line: ModemLine) -> libc::c_int {
    match line {
        ModemLine::Cts => libc::TIOCM_CTS,
        ModemLine::Rts => libc::TIOCM_RTS,
        ModemLine::Dtr => libc::TIOCM_DTR,
        ModemLine::Dsr => libc::TIOCM_DSR,
        ModemLine::Cd => libc::TIOCM_CAR,
        ModemLine::Ri => libc::TIOCM_RNG,
    }
}

/// Clears the break condition if the break is abandoned midway.
struct BreakGuard {
    handle: Arc<PortHandle>,
    armed: bool,
}

impl BreakGuard {
    fn clear(&self) -> io::Result<()> {
        if unsafe { libc::ioctl(self.handle.raw(), libc::TIOCCBRK) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn finish(mut self) -> io::Result<()> {
        self.armed = false;
        self.clear()
    }
}

impl Drop for BreakGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.clear() {
                warn!("Failed to clear break condition: {}", e);
            }
        }
    }
}

#[async_trait]
impl SerialBackend for PosixBackend {
    fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    fn open(&self, config: &PortConfiguration) -> SerialResult<()> {
        let mut slot = self.handle.lock();
        if slot.is_some() {
            return Err(SerialError::AlreadyOpen(self.port.clone()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&self.port)
            .map_err(|e| self.platform_error("open", e))?;
        let fd = OwnedFd::from(file);

        // Dropping `fd` on error closes it and releases any lock taken.
        self.apply(fd.as_raw_fd(), config, true)?;

        let fd = AsyncFd::new(fd).map_err(|e| self.platform_error("register", e))?;
        let (closing, _) = watch::channel(false);
        *slot = Some(Arc::new(PortHandle { fd, closing }));
        debug!(port = %self.port, platform = %self.profile.platform, "Descriptor registered");
        Ok(())
    }

    fn close(&self) -> SerialResult<()> {
        if self.handle.lock().take().is_some() {
            trace!(port = %self.port, "Descriptor dropped");
        }
        Ok(())
    }

    async fn aclose(&self) -> SerialResult<()> {
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        let mut released = handle.closing.subscribe();
        handle.closing.send_replace(true);
        drop(handle);

        // Suspended operations hold clones of the handle until they observe the
        // signal. The sender goes away with the last clone, after the descriptor.
        while released.changed().await.is_ok() {}
        trace!(port = %self.port, "Descriptor released");
        Ok(())
    }

    fn reconfigure(&self, config: &PortConfiguration, force: bool) -> SerialResult<()> {
        let handle = self.handle.lock().clone();
        match handle {
            Some(handle) => self.apply(handle.raw(), config, force),
            None => Ok(()),
        }
    }

    fn discard(&self, queue: Queue) -> SerialResult<()> {
        let handle = self.handle()?;
        let which = match queue {
            Queue::Input => libc::TCIFLUSH,
            Queue::Output => libc::TCOFLUSH,
        };
        if unsafe { libc::tcflush(handle.raw(), which) } < 0 {
            return Err(SerialError::last_os_error("tcflush", self.port.clone()));
        }
        Ok(())
    }

    async fn send_break(&self, duration: Duration) -> SerialResult<()> {
        let handle = self.handle()?;
        if unsafe { libc::ioctl(handle.raw(), libc::TIOCSBRK) } < 0 {
            return Err(SerialError::last_os_error("TIOCSBRK", self.port.clone()));
        }
        let guard = BreakGuard {
            handle: Arc::clone(&handle),
            armed: true,
        };
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            // The guard clears the break on the way out.
            _ = handle.closed() => return Err(SerialError::closed(&self.port)),
        }
        guard
            .finish()
            .map_err(|e| self.platform_error("TIOCCBRK", e))
    }

    async fn wait_writable(&self) -> SerialResult<()> {
        let handle = self.handle()?;
        tokio::select! {
            ready = handle.fd.writable() => {
                ready.map_err(|e| self.platform_error("poll", e))?;
                Ok(())
            }
            _ = handle.closed() => Err(SerialError::closed(&self.port)),
        }
    }

    async fn send(&self, data: &[u8]) -> SerialResult<usize> {
        let handle = self.handle()?;
        loop {
            let mut guard = tokio::select! {
                ready = handle.fd.writable() => ready.map_err(|e| self.platform_error("poll", e))?,
                _ = handle.closed() => return Err(SerialError::closed(&self.port)),
            };
            match guard.try_io(|inner| write_fd(inner.as_raw_fd(), data)) {
                Ok(result) => return result.map_err(|e| self.platform_error("write", e)),
                Err(_would_block) => continue,
            }
        }
    }

    async fn receive(&self, max_bytes: usize) -> SerialResult<Vec<u8>> {
        let handle = self.handle()?;
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(max_bytes).map_err(|e| {
            SerialError::configuration(
                "max_bytes",
                format!("cannot receive {} bytes: {}", max_bytes, e),
            )
        })?;
        buffer.resize(max_bytes, 0);
        loop {
            let mut guard = tokio::select! {
                ready = handle.fd.readable() => ready.map_err(|e| self.platform_error("poll", e))?,
                _ = handle.closed() => return Err(SerialError::closed(&self.port)),
            };
            let hung_up = guard.ready().is_read_closed();
            match guard.try_io(|inner| read_fd(inner.as_raw_fd(), &mut buffer)) {
                Ok(Ok(0)) if hung_up => return Ok(Vec::new()),
                // Readable but nothing there: a spurious wakeup, wait again.
                Ok(Ok(0)) => guard.clear_ready(),
                Ok(Ok(n)) => {
                    buffer.truncate(n);
                    return Ok(buffer);
                }
                Ok(Err(e)) => return Err(self.platform_error("read", e)),
                Err(_would_block) => {}
            }
        }
    }

    fn modem_line(&self, line: ModemLine) -> SerialResult<bool> {
        let handle = self.handle()?;
        Ok(self.modem_bits(handle.raw())? & modem_mask(line) != 0)
    }

    fn set_modem_line(&self, line: ModemLine, value: bool) -> SerialResult<()> {
        if !line.is_output() {
            return Err(SerialError::configuration(
                "modem line",
                format!("{:?} is an input line", line),
            ));
        }
        let handle = self.handle()?;
        let mask = modem_mask(line);
        let (request, call) = if value {
            (libc::TIOCMBIS, "TIOCMBIS")
        } else {
            (libc::TIOCMBIC, "TIOCMBIC")
        };
        if unsafe { libc::ioctl(handle.raw(), request, &mask) } < 0 {
            return Err(SerialError::last_os_error(call, self.port.clone()));
        }
        Ok(())
    }

    fn hangup(&self) -> SerialResult<bool> {
        let handle = self.handle()?;
        let termios = tcgetattr(handle.raw()).map_err(|e| self.platform_error("tcgetattr", e))?;
        Ok(termios.c_cflag & libc::HUPCL != 0)
    }

    fn baudrate(&self) -> SerialResult<u32> {
        let handle = self.handle()?;
        if let Some(custom) = self.profile.custom_rate {
            if let Some(rate) = custom
                .read(handle.raw())
                .map_err(|e| self.platform_error("TCGETS2", e))?
            {
                return Ok(rate);
            }
        }
        let termios = tcgetattr(handle.raw()).map_err(|e| self.platform_error("tcgetattr", e))?;
        let speed = TermiosState::from_termios(&termios).ospeed;
        self.profile.rate_for_speed(speed).ok_or_else(|| {
            SerialError::configuration(
                "baudrate",
                format!("unknown speed constant {:#o} reported by {}", speed, self.port),
            )
        })
    }
}
