//! Pure translation between [`PortConfiguration`] and termios attributes.
//!
//! [`TermiosState`] mirrors the fields of `struct termios` this crate touches so
//! encoding can be tested without a terminal. Encoding always starts from the
//! attributes currently installed and only changes the bits it owns.

use super::baud::PosixProfile;
use crate::error::{SerialError, SerialResult};
use crate::port::{LineSettings, Parity, PortConfiguration, StopBits};
use libc::{cc_t, speed_t, tcflag_t};
use std::io;

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
const ECHO_EXTRA: tcflag_t = libc::ECHOCTL | libc::ECHOKE;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
const ECHO_EXTRA: tcflag_t = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const IUCLC: tcflag_t = libc::IUCLC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const IUCLC: tcflag_t = 0;

const RAW_LFLAG_CLEAR: tcflag_t = libc::ICANON
    | libc::ECHO
    | libc::ECHOE
    | libc::ECHOK
    | libc::ECHONL
    | libc::ISIG
    | libc::IEXTEN
    | ECHO_EXTRA;
const RAW_OFLAG_CLEAR: tcflag_t = libc::OPOST | libc::ONLCR | libc::OCRNL;
const RAW_IFLAG_CLEAR: tcflag_t =
    libc::INLCR | libc::IGNCR | libc::ICRNL | libc::IGNBRK | libc::PARMRK | IUCLC;

/// The termios fields the codec reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermiosState {
    pub iflag: tcflag_t,
    pub oflag: tcflag_t,
    pub cflag: tcflag_t,
    pub lflag: tcflag_t,
    pub ispeed: speed_t,
    pub ospeed: speed_t,
    pub cc: [cc_t; libc::NCCS],
}

impl Default for TermiosState {
    fn default() -> Self {
        Self {
            iflag: 0,
            oflag: 0,
            cflag: 0,
            lflag: 0,
            ispeed: 0,
            ospeed: 0,
            cc: [0; libc::NCCS],
        }
    }
}

impl TermiosState {
    pub fn from_termios(termios: &libc::termios) -> Self {
        // SAFETY: the speed getters only read the struct.
        let (ispeed, ospeed) = unsafe { (libc::cfgetispeed(termios), libc::cfgetospeed(termios)) };
        Self {
            iflag: termios.c_iflag,
            oflag: termios.c_oflag,
            cflag: termios.c_cflag,
            lflag: termios.c_lflag,
            ispeed,
            ospeed,
            cc: termios.c_cc,
        }
    }

    /// Copy this state into `termios`, installing speeds through the libc setters.
    pub fn apply_to(&self, termios: &mut libc::termios) -> io::Result<()> {
        termios.c_iflag = self.iflag;
        termios.c_oflag = self.oflag;
        termios.c_cflag = self.cflag;
        termios.c_lflag = self.lflag;
        termios.c_cc = self.cc;
        // SAFETY: termios is a valid, exclusively borrowed struct.
        unsafe {
            if libc::cfsetispeed(termios, self.ispeed) < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::cfsetospeed(termios, self.ospeed) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Whether the raw-mode bits are all in place.
    pub fn is_raw(&self) -> bool {
        self.lflag & RAW_LFLAG_CLEAR == 0
            && self.oflag & RAW_OFLAG_CLEAR == 0
            && self.iflag & RAW_IFLAG_CLEAR == 0
            && self.cflag & (libc::CLOCAL | libc::CREAD) == (libc::CLOCAL | libc::CREAD)
            && self.cc[libc::VMIN] == 0
            && self.cc[libc::VTIME] == 0
    }
}

/// Result of encoding a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    pub state: TermiosState,
    /// Rate to program through the profile's custom-rate call after writing `state`.
    pub custom_rate: Option<u32>,
}

/// Encode `config` on top of `previous`.
///
/// `OnePointFive` stop bits are written as two; termios has no finer setting.
pub fn encode(
    config: &PortConfiguration,
    profile: &PosixProfile,
    previous: &TermiosState,
) -> SerialResult<Encoded> {
    let mut state = *previous;

    state.cflag |= libc::CLOCAL | libc::CREAD;
    state.lflag &= !RAW_LFLAG_CLEAR;
    state.oflag &= !RAW_OFLAG_CLEAR;
    state.iflag &= !RAW_IFLAG_CLEAR;

    let baud = profile.resolve(config.baudrate)?;
    state.ispeed = baud.speed;
    state.ospeed = baud.speed;

    state.cflag &= !libc::CSIZE;
    state.cflag |= match config.bytesize {
        5 => libc::CS5,
        6 => libc::CS6,
        7 => libc::CS7,
        8 => libc::CS8,
        other => {
            return Err(SerialError::configuration(
                "bytesize",
                format!("{} is not one of 5, 6, 7, 8", other),
            ))
        }
    };

    match config.stopbits {
        StopBits::One => state.cflag &= !libc::CSTOPB,
        StopBits::OnePointFive | StopBits::Two => state.cflag |= libc::CSTOPB,
    }

    state.iflag &= !(libc::INPCK | libc::ISTRIP);
    let stick = profile.stick_parity.unwrap_or(0);
    match config.parity {
        Parity::None => state.cflag &= !(libc::PARENB | libc::PARODD | stick),
        Parity::Even => {
            state.cflag &= !(libc::PARODD | stick);
            state.cflag |= libc::PARENB;
        }
        Parity::Odd => {
            state.cflag &= !stick;
            state.cflag |= libc::PARENB | libc::PARODD;
        }
        Parity::Mark | Parity::Space if profile.stick_parity.is_none() => {
            return Err(SerialError::configuration(
                "parity",
                format!("{:?} parity is not supported on {}", config.parity, profile.platform),
            ));
        }
        Parity::Mark => state.cflag |= libc::PARENB | stick | libc::PARODD,
        Parity::Space => {
            state.cflag |= libc::PARENB | stick;
            state.cflag &= !libc::PARODD;
        }
    }

    if config.xonxoff {
        state.iflag |= libc::IXON | libc::IXOFF;
    } else {
        state.iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY);
    }

    match profile.rts_cts {
        Some(flag) if config.rtscts => state.cflag |= flag,
        Some(flag) => state.cflag &= !flag,
        None if config.rtscts => {
            return Err(SerialError::configuration(
                "rtscts",
                format!("hardware flow control is not supported on {}", profile.platform),
            ));
        }
        None => {}
    }

    if config.hangup {
        state.cflag |= libc::HUPCL;
    } else {
        state.cflag &= !libc::HUPCL;
    }

    state.cc[libc::VMIN] = 0;
    state.cc[libc::VTIME] = 0;

    Ok(Encoded {
        state,
        custom_rate: baud.needs_custom_rate().then_some(config.baudrate),
    })
}

/// Read the line settings back out of `state`.
pub fn decode(state: &TermiosState, profile: &PosixProfile) -> LineSettings {
    let bytesize = match state.cflag & libc::CSIZE {
        libc::CS5 => 5,
        libc::CS6 => 6,
        libc::CS7 => 7,
        _ => 8,
    };

    let stopbits = if state.cflag & libc::CSTOPB != 0 {
        StopBits::Two
    } else {
        StopBits::One
    };

    let odd = state.cflag & libc::PARODD != 0;
    let stick = profile
        .stick_parity
        .map_or(false, |flag| state.cflag & flag != 0);
    let parity = match (state.cflag & libc::PARENB != 0, stick, odd) {
        (false, _, _) => Parity::None,
        (true, true, true) => Parity::Mark,
        (true, true, false) => Parity::Space,
        (true, false, true) => Parity::Odd,
        (true, false, false) => Parity::Even,
    };

    let soft = libc::IXON | libc::IXOFF;
    LineSettings {
        bytesize,
        parity,
        stopbits,
        xonxoff: state.iflag & soft == soft,
        rtscts: profile
            .rts_cts
            .map_or(false, |flag| state.cflag & flag != 0),
        hangup: state.cflag & libc::HUPCL != 0,
    }
}

/// Whether `next` has to be written to the OS.
pub fn needs_write(previous: &TermiosState, next: &TermiosState, force: bool) -> bool {
    force || previous != next
}
