//! Overlapped COM port backend.
//!
//! The handle is opened with `FILE_FLAG_OVERLAPPED` and handed to tokio's
//! named-pipe client, which registers it with the runtime's completion port
//! once and drives overlapped `ReadFile`/`WriteFile` underneath
//! `readable`/`try_read` and `writable`/`try_write`.

use super::codec::{self, CommTimeouts, DcbSettings, ReadBuffer};
use crate::error::{SerialError, SerialResult};
use crate::port::{ModemLine, PortConfiguration, Queue, SerialBackend};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::io;
use std::iter;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, IntoRawHandle, OwnedHandle, RawHandle};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::windows::named_pipe::NamedPipeClient;
use tokio::sync::watch;
use tracing::{debug, trace, warn};
use winapi::shared::minwindef::{DWORD, FALSE};
use winapi::shared::winerror::{ERROR_ACCESS_DENIED, ERROR_SHARING_VIOLATION};
use winapi::um::commapi::{
    ClearCommBreak, ClearCommError, EscapeCommFunction, GetCommModemStatus, GetCommState,
    PurgeComm, SetCommBreak, SetCommMask, SetCommState, SetCommTimeouts,
};
use winapi::um::fileapi::{CreateFileW, OPEN_EXISTING};
use winapi::um::handleapi::INVALID_HANDLE_VALUE;
use winapi::um::winbase::{
    CLRDTR, CLRRTS, COMMTIMEOUTS, DCB, EV_ERR, FILE_FLAG_OVERLAPPED, MS_CTS_ON, MS_DSR_ON,
    MS_RING_ON, MS_RLSD_ON, PURGE_RXABORT, PURGE_RXCLEAR, PURGE_TXABORT, PURGE_TXCLEAR, SETDTR,
    SETRTS,
};
use winapi::um::winnt::{FILE_ATTRIBUTE_NORMAL, GENERIC_READ, GENERIC_WRITE, HANDLE};

/// The handle is closed (with `pipe`) before `closing` is dropped; `aclose`
/// waits for the dropped sender.
struct PortHandle {
    pipe: NamedPipeClient,
    closing: watch::Sender<bool>,
}

impl PortHandle {
    fn raw(&self) -> HANDLE {
        self.pipe.as_raw_handle() as HANDLE
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

/// Serial backend for Windows COM ports.
pub struct WindowsBackend {
    port: String,
    handle: Mutex<Option<Arc<PortHandle>>>,
    read_buffer: tokio::sync::Mutex<ReadBuffer>,
    rts: AtomicBool,
    dtr: AtomicBool,
    // Win32 has no hangup-on-close control; the configured value is reported back.
    hangup: AtomicBool,
}

impl WindowsBackend {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            handle: Mutex::new(None),
            read_buffer: tokio::sync::Mutex::new(ReadBuffer::new()),
            rts: AtomicBool::new(false),
            dtr: AtomicBool::new(false),
            hangup: AtomicBool::new(true),
        }
    }

    fn handle(&self) -> SerialResult<Arc<PortHandle>> {
        self.handle
            .lock()
            .clone()
            .ok_or_else(|| SerialError::closed(&self.port))
    }

    fn check(&self, call: &'static str, ok: i32) -> SerialResult<()> {
        if ok == FALSE {
            return Err(SerialError::last_os_error(call, self.port.clone()));
        }
        Ok(())
    }

    fn configure(&self, raw: HANDLE, config: &PortConfiguration) -> SerialResult<()> {
        let settings = codec::encode_dcb(config)?;

        let mut errors: DWORD = 0;
        self.check("ClearCommError", unsafe {
            ClearCommError(raw, &mut errors, ptr::null_mut())
        })?;
        self.check("SetCommMask", unsafe { SetCommMask(raw, EV_ERR) })?;

        let timeouts = CommTimeouts::wait_for_any_byte();
        let mut comm_timeouts = COMMTIMEOUTS {
            ReadIntervalTimeout: timeouts.read_interval,
            ReadTotalTimeoutMultiplier: timeouts.read_total_multiplier,
            ReadTotalTimeoutConstant: timeouts.read_total_constant,
            WriteTotalTimeoutMultiplier: timeouts.write_total_multiplier,
            WriteTotalTimeoutConstant: timeouts.write_total_constant,
        };
        self.check("SetCommTimeouts", unsafe {
            SetCommTimeouts(raw, &mut comm_timeouts)
        })?;

        let mut dcb = self.comm_state(raw)?;
        write_dcb(&mut dcb, &settings);
        self.check("SetCommState", unsafe { SetCommState(raw, &mut dcb) })?;

        self.rts.store(!config.rtscts, Ordering::SeqCst);
        self.dtr.store(false, Ordering::SeqCst);
        self.hangup.store(config.hangup, Ordering::SeqCst);
        debug!(port = %self.port, baudrate = settings.baud_rate, "DCB written");
        Ok(())
    }

    fn comm_state(&self, raw: HANDLE) -> SerialResult<DCB> {
        // SAFETY: DCB is plain old data; GetCommState fills it in.
        let mut dcb: DCB = unsafe { std::mem::zeroed() };
        dcb.DCBlength = std::mem::size_of::<DCB>() as DWORD;
        self.check("GetCommState", unsafe { GetCommState(raw, &mut dcb) })?;
        Ok(dcb)
    }
}

fn write_dcb(dcb: &mut DCB, settings: &DcbSettings) {
    dcb.BaudRate = settings.baud_rate;
    dcb.ByteSize = settings.byte_size;
    dcb.Parity = settings.parity;
    dcb.StopBits = settings.stop_bits;
    dcb.set_fBinary(settings.f_binary as DWORD);
    dcb.set_fParity(settings.f_parity as DWORD);
    dcb.set_fOutxCtsFlow(settings.f_outx_cts_flow as DWORD);
    dcb.set_fOutxDsrFlow(settings.f_outx_dsr_flow as DWORD);
    dcb.set_fDtrControl(settings.f_dtr_control);
    dcb.set_fDsrSensitivity(settings.f_dsr_sensitivity as DWORD);
    dcb.set_fTXContinueOnXoff(settings.f_tx_continue_on_xoff as DWORD);
    dcb.set_fOutX(settings.f_out_x as DWORD);
    dcb.set_fInX(settings.f_in_x as DWORD);
    dcb.set_fErrorChar(settings.f_error_char as DWORD);
    dcb.set_fNull(settings.f_null as DWORD);
    dcb.set_fRtsControl(settings.f_rts_control);
    dcb.set_fAbortOnError(settings.f_abort_on_error as DWORD);
    dcb.XonLim = settings.xon_lim;
    dcb.XoffLim = settings.xoff_lim;
    dcb.XonChar = settings.xon_char;
    dcb.XoffChar = settings.xoff_char;
}

impl std::fmt::Debug for WindowsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsBackend")
            .field("port", &self.port)
            .field("open", &self.is_open())
            .finish()
    }
}

struct BreakGuard {
    handle: Arc<PortHandle>,
    armed: bool,
}

impl BreakGuard {
    fn finish(mut self) -> bool {
        self.armed = false;
        unsafe { ClearCommBreak(self.handle.raw()) != FALSE }
    }
}

impl Drop for BreakGuard {
    fn drop(&mut self) {
        if self.armed && unsafe { ClearCommBreak(self.handle.raw()) } == FALSE {
            warn!("Failed to clear break condition: {}", io::Error::last_os_error());
        }
    }
}

#[async_trait]
impl SerialBackend for WindowsBackend {
    fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    fn open(&self, config: &PortConfiguration) -> SerialResult<()> {
        let mut slot = self.handle.lock();
        if slot.is_some() {
            return Err(SerialError::AlreadyOpen(self.port.clone()));
        }

        let path: Vec<u16> = OsStr::new(&codec::device_path(&self.port))
            .encode_wide()
            .chain(iter::once(0))
            .collect();
        let raw = unsafe {
            CreateFileW(
                path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null_mut(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL | FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            let source = io::Error::last_os_error();
            let code = source.raw_os_error().map(|c| c as DWORD);
            return Err(match code {
                Some(ERROR_ACCESS_DENIED) | Some(ERROR_SHARING_VIOLATION) => {
                    SerialError::ExclusiveAccess {
                        port: self.port.clone(),
                        source,
                    }
                }
                _ => SerialError::platform("CreateFileW", self.port.clone(), source),
            });
        }

        // Closed on drop if configuration fails.
        let owned = unsafe { OwnedHandle::from_raw_handle(raw as RawHandle) };
        self.configure(owned.as_raw_handle() as HANDLE, config)?;

        let pipe = unsafe { NamedPipeClient::from_raw_handle(owned.into_raw_handle()) }
            .map_err(|e| SerialError::platform("register", self.port.clone(), e))?;
        let (closing, _) = watch::channel(false);
        *slot = Some(Arc::new(PortHandle { pipe, closing }));
        debug!(port = %self.port, "Handle registered with completion port");
        Ok(())
    }

    fn close(&self) -> SerialResult<()> {
        if self.handle.lock().take().is_some() {
            trace!(port = %self.port, "Handle dropped");
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

        // Waiters drop their clones once woken; the last one closes the handle.
        while released.changed().await.is_ok() {}
        trace!(port = %self.port, "Handle released");
        Ok(())
    }

    // DCB writes are cheap and idempotent, so `force` changes nothing here.
    fn reconfigure(&self, config: &PortConfiguration, _force: bool) -> SerialResult<()> {
        let handle = self.handle.lock().clone();
        match handle {
            Some(handle) => self.configure(handle.raw(), config),
            None => Ok(()),
        }
    }

    fn discard(&self, queue: Queue) -> SerialResult<()> {
        let handle = self.handle()?;
        let flags = match queue {
            Queue::Input => PURGE_RXCLEAR | PURGE_RXABORT,
            Queue::Output => PURGE_TXCLEAR | PURGE_TXABORT,
        };
        self.check("PurgeComm", unsafe { PurgeComm(handle.raw(), flags) })
    }

    async fn send_break(&self, duration: Duration) -> SerialResult<()> {
        let handle = self.handle()?;
        self.check("SetCommBreak", unsafe { SetCommBreak(handle.raw()) })?;
        let guard = BreakGuard {
            handle: Arc::clone(&handle),
            armed: true,
        };
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = handle.closed() => return Err(SerialError::closed(&self.port)),
        }
        if !guard.finish() {
            return Err(SerialError::last_os_error("ClearCommBreak", self.port.clone()));
        }
        Ok(())
    }

    async fn wait_writable(&self) -> SerialResult<()> {
        let handle = self.handle()?;
        tokio::select! {
            ready = handle.pipe.writable() => {
                ready.map_err(|e| SerialError::platform("WriteFile", self.port.clone(), e))
            }
            _ = handle.closed() => Err(SerialError::closed(&self.port)),
        }
    }

    async fn send(&self, data: &[u8]) -> SerialResult<usize> {
        let handle = self.handle()?;
        loop {
            tokio::select! {
                ready = handle.pipe.writable() => {
                    ready.map_err(|e| SerialError::platform("WriteFile", self.port.clone(), e))?
                }
                _ = handle.closed() => return Err(SerialError::closed(&self.port)),
            }
            match handle.pipe.try_write(data) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(SerialError::platform("WriteFile", self.port.clone(), e)),
            }
        }
    }

    async fn receive(&self, max_bytes: usize) -> SerialResult<Vec<u8>> {
        let handle = self.handle()?;
        let mut buffer = self.read_buffer.lock().await;
        loop {
            tokio::select! {
                ready = handle.pipe.readable() => {
                    ready.map_err(|e| SerialError::platform("ReadFile", self.port.clone(), e))?
                }
                _ = handle.closed() => return Err(SerialError::closed(&self.port)),
            }
            // Only the `n` bytes read are copied out, so a large `max_bytes`
            // costs one allocation per size change rather than one per call.
            let buf = buffer.get(max_bytes);
            match handle.pipe.try_read(buf) {
                Ok(0) => {
                    trace!(port = %self.port, "Empty read completion, reissuing");
                    tokio::task::yield_now().await;
                }
                Ok(n) => return Ok(buf[..n].to_vec()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if codec::is_retriable_read_error(&e) => {
                    trace!(port = %self.port, "Read timed out, reissuing");
                }
                Err(e) => return Err(SerialError::platform("ReadFile", self.port.clone(), e)),
            }
        }
    }

    fn modem_line(&self, line: ModemLine) -> SerialResult<bool> {
        let handle = self.handle()?;
        let mask = match line {
            ModemLine::Rts => return Ok(self.rts.load(Ordering::SeqCst)),
            ModemLine::Dtr => return Ok(self.dtr.load(Ordering::SeqCst)),
            ModemLine::Cts => MS_CTS_ON,
            ModemLine::Dsr => MS_DSR_ON,
            ModemLine::Ri => MS_RING_ON,
            ModemLine::Cd => MS_RLSD_ON,
        };
        let mut status: DWORD = 0;
        self.check("GetCommModemStatus", unsafe {
            GetCommModemStatus(handle.raw(), &mut status)
        })?;
        Ok(status & mask != 0)
    }

    fn set_modem_line(&self, line: ModemLine, value: bool) -> SerialResult<()> {
        let (function, state) = match (line, value) {
            (ModemLine::Rts, true) => (SETRTS, &self.rts),
            (ModemLine::Rts, false) => (CLRRTS, &self.rts),
            (ModemLine::Dtr, true) => (SETDTR, &self.dtr),
            (ModemLine::Dtr, false) => (CLRDTR, &self.dtr),
            (input, _) => {
                return Err(SerialError::configuration(
                    "modem line",
                    format!("{:?} is an input line", input),
                ))
            }
        };
        let handle = self.handle()?;
        self.check("EscapeCommFunction", unsafe {
            EscapeCommFunction(handle.raw(), function)
        })?;
        state.store(value, Ordering::SeqCst);
        Ok(())
    }

    fn hangup(&self) -> SerialResult<bool> {
        self.handle()?;
        Ok(self.hangup.load(Ordering::SeqCst))
    }

    fn baudrate(&self) -> SerialResult<u32> {
        let handle = self.handle()?;
        Ok(self.comm_state(handle.raw())?.BaudRate)
    }
}
