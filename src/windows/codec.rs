//! Pure DCB and COMMTIMEOUTS marshaling.
//!
//! [`DcbSettings`] names every DCB field the backend writes, so the encoding
//! can be checked on any host. The backend copies it field by field into the
//! real `winapi` struct.

use crate::error::{SerialError, SerialResult};
use crate::port::{LineSettings, Parity, PortConfiguration, StopBits};
use std::io;

pub const NOPARITY: u8 = 0;
pub const ODDPARITY: u8 = 1;
pub const EVENPARITY: u8 = 2;
pub const MARKPARITY: u8 = 3;
pub const SPACEPARITY: u8 = 4;

pub const ONESTOPBIT: u8 = 0;
pub const ONE5STOPBITS: u8 = 1;
pub const TWOSTOPBITS: u8 = 2;

pub const DTR_CONTROL_DISABLE: u32 = 0;
pub const RTS_CONTROL_ENABLE: u32 = 1;
pub const RTS_CONTROL_HANDSHAKE: u32 = 2;

pub const XON_CHAR: i8 = 0x11;
pub const XOFF_CHAR: i8 = 0x13;

/// `ERROR_TIMEOUT` from winerror.h.
pub const ERROR_TIMEOUT: i32 = 1460;

/// Device control block contents, one field per DCB member we set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcbSettings {
    pub baud_rate: u32,
    pub byte_size: u8,
    pub parity: u8,
    pub stop_bits: u8,
    pub f_binary: bool,
    pub f_parity: bool,
    pub f_outx_cts_flow: bool,
    pub f_outx_dsr_flow: bool,
    pub f_dtr_control: u32,
    pub f_dsr_sensitivity: bool,
    pub f_tx_continue_on_xoff: bool,
    pub f_out_x: bool,
    pub f_in_x: bool,
    pub f_error_char: bool,
    pub f_null: bool,
    pub f_rts_control: u32,
    pub f_abort_on_error: bool,
    pub xon_lim: u16,
    pub xoff_lim: u16,
    pub xon_char: i8,
    pub xoff_char: i8,
}

/// Encode `config` into DCB fields.
pub fn encode_dcb(config: &PortConfiguration) -> SerialResult<DcbSettings> {
    if config.baudrate == 0 {
        return Err(SerialError::configuration(
            "baudrate",
            "must be a positive number",
        ));
    }

    if !(5..=8).contains(&config.bytesize) {
        return Err(SerialError::configuration(
            "bytesize",
            format!("{} is not one of 5, 6, 7, 8", config.bytesize),
        ));
    }

    let stop_bits = match (config.stopbits, config.bytesize) {
        (StopBits::One, _) => ONESTOPBIT,
        (StopBits::OnePointFive, 5) => ONE5STOPBITS,
        (StopBits::OnePointFive, size) => {
            return Err(SerialError::configuration(
                "stopbits",
                format!("1.5 stop bits need 5 data bits, not {}", size),
            ))
        }
        (StopBits::Two, 5) => {
            return Err(SerialError::configuration(
                "stopbits",
                "2 stop bits cannot be combined with 5 data bits",
            ))
        }
        (StopBits::Two, _) => TWOSTOPBITS,
    };

    let parity = match config.parity {
        Parity::None => NOPARITY,
        Parity::Odd => ODDPARITY,
        Parity::Even => EVENPARITY,
        Parity::Mark => MARKPARITY,
        Parity::Space => SPACEPARITY,
    };

    Ok(DcbSettings {
        baud_rate: config.baudrate,
        byte_size: config.bytesize,
        parity,
        stop_bits,
        f_binary: true,
        f_parity: config.parity != Parity::None,
        f_outx_cts_flow: config.rtscts,
        f_outx_dsr_flow: false,
        f_dtr_control: DTR_CONTROL_DISABLE,
        f_dsr_sensitivity: false,
        f_tx_continue_on_xoff: false,
        f_out_x: config.xonxoff,
        f_in_x: config.xonxoff,
        f_error_char: false,
        f_null: false,
        f_rts_control: if config.rtscts {
            RTS_CONTROL_HANDSHAKE
        } else {
            RTS_CONTROL_ENABLE
        },
        f_abort_on_error: false,
        xon_lim: 0,
        xoff_lim: 0,
        xon_char: XON_CHAR,
        xoff_char: XOFF_CHAR,
    })
}

/// Read line settings back from DCB fields. Hangup has no DCB field and is
/// passed through.
pub fn decode_dcb(dcb: &DcbSettings, hangup: bool) -> LineSettings {
    let parity = match dcb.parity {
        ODDPARITY => Parity::Odd,
        EVENPARITY => Parity::Even,
        MARKPARITY => Parity::Mark,
        SPACEPARITY => Parity::Space,
        _ => Parity::None,
    };
    let stopbits = match dcb.stop_bits {
        ONE5STOPBITS => StopBits::OnePointFive,
        TWOSTOPBITS => StopBits::Two,
        _ => StopBits::One,
    };
    LineSettings {
        bytesize: dcb.byte_size,
        parity,
        stopbits,
        xonxoff: dcb.f_out_x && dcb.f_in_x,
        rtscts: dcb.f_outx_cts_flow && dcb.f_rts_control == RTS_CONTROL_HANDSHAKE,
        hangup,
    }
}

/// COMMTIMEOUTS values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommTimeouts {
    pub read_interval: u32,
    pub read_total_multiplier: u32,
    pub read_total_constant: u32,
    pub write_total_multiplier: u32,
    pub write_total_constant: u32,
}

impl CommTimeouts {
    /// Return at once when bytes are buffered, otherwise wait for the first
    /// byte for about 49 days. Reads that run out the constant complete with
    /// `ERROR_TIMEOUT` and are retried.
    pub const fn wait_for_any_byte() -> Self {
        Self {
            read_interval: u32::MAX,
            read_total_multiplier: u32::MAX,
            read_total_constant: u32::MAX - 1,
            write_total_multiplier: 0,
            write_total_constant: 0,
        }
    }
}

/// Whether a failed read completion should be reissued rather than reported.
pub fn is_retriable_read_error(err: &io::Error) -> bool {
    err.raw_os_error() == Some(ERROR_TIMEOUT) || err.kind() == io::ErrorKind::TimedOut
}

/// Device path for `port`: `COM7` becomes `\\.\COM7`.
pub fn device_path(port: &str) -> String {
    if port.starts_with(r"\\.\") {
        port.to_string()
    } else {
        format!(r"\\.\{}", port)
    }
}

/// Scratch space a read is copied into before the received bytes are handed
/// out. Reallocated only when the requested size changes.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    buf: Vec<u8>,
    allocations: usize,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slice of exactly `size` bytes. After reuse it still holds whatever the
    /// previous read left there.
    pub fn get(&mut self, size: usize) -> &mut [u8] {
        if self.buf.len() != size {
            self.buf = vec![0; size];
            self.allocations += 1;
        }
        &mut self.buf
    }

    pub fn allocations(&self) -> usize {
        self.allocations
    }
}
