//! Baud rate resolution and per-platform capability profiles.

use super::tables::{CANDIDATE_RATES, CYGWIN_RATES, LINUX_RATES};
use crate::error::{SerialError, SerialResult};
use crate::port::Platform;
use libc::{speed_t, tcflag_t};
use std::io;
use std::os::unix::io::RawFd;

/// Linux stick parity flag (`CMSPAR`).
pub const LINUX_CMSPAR: tcflag_t = 0o10000000000;

/// Hardware flow control flag of the host libc, if it has one.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub const HOST_RTSCTS: Option<tcflag_t> = Some(libc::CRTSCTS);

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
pub const HOST_RTSCTS: Option<tcflag_t> = None;

/// The host's symbolic constant for `rate`, if there is one.
pub fn symbolic_speed(rate: u32) -> Option<speed_t> {
    let speed = match rate {
        50 => libc::B50,
        75 => libc::B75,
        110 => libc::B110,
        134 => libc::B134,
        150 => libc::B150,
        200 => libc::B200,
        300 => libc::B300,
        600 => libc::B600,
        1200 => libc::B1200,
        1800 => libc::B1800,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460800 => libc::B460800,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        500000 => libc::B500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        576000 => libc::B576000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921600 => libc::B921600,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1000000 => libc::B1000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1152000 => libc::B1152000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1500000 => libc::B1500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2000000 => libc::B2000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2500000 => libc::B2500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3000000 => libc::B3000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3500000 => libc::B3500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        4000000 => libc::B4000000,
        _ => return None,
    };
    Some(speed)
}

/// Static rate lookup beyond the symbolic constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTable {
    None,
    Static(&'static [(u32, u32)]),
    /// Speed constants are the rates themselves (BSD).
    Literal,
}

impl RateTable {
    pub fn lookup(self, rate: u32) -> Option<speed_t> {
        match self {
            Self::None => None,
            Self::Static(table) => table
                .iter()
                .find(|(r, _)| *r == rate)
                .map(|(_, speed)| *speed as speed_t),
            Self::Literal => Some(rate as speed_t),
        }
    }

    pub fn rate_of(self, speed: speed_t) -> Option<u32> {
        match self {
            Self::None => None,
            Self::Static(table) => table
                .iter()
                .find(|(_, s)| *s as speed_t == speed)
                .map(|(rate, _)| *rate),
            Self::Literal => u32::try_from(speed).ok(),
        }
    }
}

/// Secondary call that programs a rate with no speed constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomRate {
    /// Linux `TCGETS2`/`TCSETS2` with `BOTHER`.
    Termios2,
    /// macOS `IOSSIOSPEED`.
    IoSsioSpeed,
}

impl CustomRate {
    /// Program `rate` on `fd` after the main attribute write.
    pub fn apply(self, fd: RawFd, rate: u32) -> io::Result<()> {
        match self {
            Self::Termios2 => termios2::set_rate(fd, rate),
            Self::IoSsioSpeed => iossiospeed::set_rate(fd, rate),
        }
    }

    /// Read back the programmed rate, if the mechanism can report it.
    pub fn read(self, fd: RawFd) -> io::Result<Option<u32>> {
        match self {
            Self::Termios2 => termios2::get_rate(fd).map(Some),
            Self::IoSsioSpeed => Ok(None),
        }
    }
}

#[cfg(target_os = "linux")]
mod termios2 {
    use std::io;
    use std::os::unix::io::RawFd;

    fn get(fd: RawFd) -> io::Result<libc::termios2> {
        // SAFETY: termios2 is plain old data; the kernel fills it in.
        let mut tio: libc::termios2 = unsafe { std::mem::zeroed() };
        if unsafe { libc::ioctl(fd, libc::TCGETS2, &mut tio) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(tio)
    }

    pub fn set_rate(fd: RawFd, rate: u32) -> io::Result<()> {
        let mut tio = get(fd)?;
        tio.c_cflag &= !libc::CBAUD;
        tio.c_cflag |= libc::BOTHER;
        tio.c_ispeed = rate;
        tio.c_ospeed = rate;
        if unsafe { libc::ioctl(fd, libc::TCSETS2, &tio) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn get_rate(fd: RawFd) -> io::Result<u32> {
        get(fd).map(|tio| tio.c_ospeed)
    }
}

#[cfg(not(target_os = "linux"))]
mod termios2 {
    use std::io;
    use std::os::unix::io::RawFd;

    pub fn set_rate(_fd: RawFd, _rate: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "termios2 is only available on Linux",
        ))
    }

    pub fn get_rate(fd: RawFd) -> io::Result<u32> {
        set_rate(fd, 0).map(|_| 0)
    }
}

#[cfg(target_vendor = "apple")]
mod iossiospeed {
    use std::io;
    use std::os::unix::io::RawFd;

    // _IOW('T', 2, speed_t) as the IOKit headers spell it.
    const IOSSIOSPEED: libc::c_ulong = 0x8004_5402;

    pub fn set_rate(fd: RawFd, rate: u32) -> io::Result<()> {
        let speed = rate as libc::speed_t;
        if unsafe { libc::ioctl(fd, IOSSIOSPEED, &speed) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(target_vendor = "apple"))]
mod iossiospeed {
    use std::io;
    use std::os::unix::io::RawFd;

    pub fn set_rate(_fd: RawFd, _rate: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "IOSSIOSPEED is only available on Apple platforms",
        ))
    }
}

/// Where a resolved speed came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudSource {
    Symbolic,
    Table,
    /// Generic escape constant; the custom-rate call must follow.
    Escape,
    /// Placeholder constant; the custom-rate call must follow.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBaud {
    pub speed: speed_t,
    pub source: BaudSource,
}

impl ResolvedBaud {
    pub fn needs_custom_rate(&self) -> bool {
        matches!(self.source, BaudSource::Escape | BaudSource::Fallback)
    }
}

/// Termios capabilities of one POSIX platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixProfile {
    pub platform: Platform,
    /// Flag enabling MARK/SPACE parity, if the platform has one.
    pub stick_parity: Option<tcflag_t>,
    /// Hardware flow control flag, if the platform has one.
    pub rts_cts: Option<tcflag_t>,
    pub rates: RateTable,
    /// Speed constant meaning "rate set elsewhere", written with the main attributes.
    pub escape_speed: Option<speed_t>,
    pub custom_rate: Option<CustomRate>,
    /// Speed constants double as rates (reverse lookups need no table).
    pub speeds_are_rates: bool,
}

impl PosixProfile {
    /// Plain termios: symbolic constants only.
    pub fn generic() -> Self {
        Self {
            platform: Platform::Posix,
            stick_parity: None,
            rts_cts: HOST_RTSCTS,
            rates: RateTable::None,
            escape_speed: None,
            custom_rate: None,
            speeds_are_rates: false,
        }
    }

    // glibc refuses BOTHER in cfsetospeed, so the main write carries a
    // placeholder and TCSETS2 installs BOTHER with the real rate.
    pub fn linux() -> Self {
        Self {
            platform: Platform::Linux,
            stick_parity: Some(LINUX_CMSPAR),
            rates: RateTable::Static(LINUX_RATES),
            custom_rate: Some(CustomRate::Termios2),
            ..Self::generic()
        }
    }

    pub fn darwin() -> Self {
        Self {
            platform: Platform::Darwin,
            custom_rate: Some(CustomRate::IoSsioSpeed),
            speeds_are_rates: true,
            ..Self::generic()
        }
    }

    pub fn bsd() -> Self {
        Self {
            platform: Platform::Bsd,
            rates: RateTable::Literal,
            speeds_are_rates: true,
            ..Self::generic()
        }
    }

    pub fn cygwin() -> Self {
        Self {
            platform: Platform::Cygwin,
            rates: RateTable::Static(CYGWIN_RATES),
            ..Self::generic()
        }
    }

    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Linux => Self::linux(),
            Platform::Darwin => Self::darwin(),
            Platform::Bsd => Self::bsd(),
            Platform::Cygwin => Self::cygwin(),
            Platform::Posix | Platform::Windows => Self::generic(),
        }
    }

    /// Map `rate` to a speed constant; first match wins.
    ///
    /// Symbolic constant, then the platform table, then the escape constant,
    /// then `B38400` as placeholder. The last two require a custom-rate
    /// mechanism; without one the rate is rejected.
    pub fn resolve(&self, rate: u32) -> SerialResult<ResolvedBaud> {
        if rate == 0 {
            return Err(SerialError::configuration(
                "baudrate",
                "must be a positive number",
            ));
        }
        if let Some(speed) = symbolic_speed(rate) {
            return Ok(ResolvedBaud {
                speed,
                source: BaudSource::Symbolic,
            });
        }
        if let Some(speed) = self.rates.lookup(rate) {
            return Ok(ResolvedBaud {
                speed,
                source: BaudSource::Table,
            });
        }
        if self.custom_rate.is_none() {
            return Err(SerialError::configuration(
                "baudrate",
                format!(
                    "{} is not supported on {} and no custom rate mechanism is available",
                    rate, self.platform
                ),
            ));
        }
        Ok(match self.escape_speed {
            Some(speed) => ResolvedBaud {
                speed,
                source: BaudSource::Escape,
            },
            None => ResolvedBaud {
                speed: libc::B38400,
                source: BaudSource::Fallback,
            },
        })
    }

    /// Reverse of [`resolve`](Self::resolve) for a speed read from the OS.
    pub fn rate_for_speed(&self, speed: speed_t) -> Option<u32> {
        if self.speeds_are_rates {
            return u32::try_from(speed).ok();
        }
        CANDIDATE_RATES
            .iter()
            .copied()
            .find(|rate| symbolic_speed(*rate) == Some(speed))
            .or_else(|| self.rates.rate_of(speed))
    }

    /// Run the custom-rate call for `rate`.
    pub fn apply_custom_rate(&self, fd: RawFd, rate: u32) -> SerialResult<()> {
        let custom = self.custom_rate.ok_or_else(|| {
            SerialError::configuration(
                "baudrate",
                format!("{} needs a custom rate, which {} lacks", rate, self.platform),
            )
        })?;
        custom.apply(fd, rate).map_err(|e| {
            SerialError::configuration(
                "baudrate",
                format!("Failed to set custom baud rate {}: {}", rate, e),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_9600_is_symbolic() {
        for profile in [
            PosixProfile::generic(),
            PosixProfile::linux(),
            PosixProfile::darwin(),
            PosixProfile::bsd(),
        ] {
            let resolved = profile.resolve(9600).unwrap();
            assert_eq!(resolved.speed, libc::B9600);
            assert_eq!(resolved.source, BaudSource::Symbolic);
            assert!(!resolved.needs_custom_rate());
            assert_eq!(profile.rate_for_speed(resolved.speed), Some(9600));
        }
    }

    #[test]
    fn test_unusual_rate_takes_custom_path_on_linux() {
        let resolved = PosixProfile::linux().resolve(250_000).unwrap();
        assert_eq!(resolved.source, BaudSource::Fallback);
        assert_eq!(resolved.speed, libc::B38400);
        assert!(resolved.needs_custom_rate());
    }

    #[test]
    fn test_escape_constant_preferred_over_fallback() {
        let profile = PosixProfile {
            escape_speed: Some(0o010000),
            ..PosixProfile::linux()
        };
        let resolved = profile.resolve(250_000).unwrap();
        assert_eq!(resolved.source, BaudSource::Escape);
        assert_eq!(resolved.speed, 0o010000);
    }

    #[test]
    fn test_unsupported_rate_without_escape_is_rejected() {
        let err = PosixProfile::generic().resolve(250_000).unwrap_err();
        match err {
            SerialError::Configuration { field, message } => {
                assert_eq!(field, "baudrate");
                assert!(message.contains("250000"));
            }
            other => panic!("Expected configuration error, got: {:?}", other),
        }
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert!(PosixProfile::linux().resolve(0).unwrap_err().is_configuration());
    }

    #[test]
    fn test_bsd_accepts_literal_rates() {
        let resolved = PosixProfile::bsd().resolve(250_000).unwrap();
        assert_eq!(resolved.source, BaudSource::Table);
        assert_eq!(resolved.speed, 250_000 as speed_t);
        assert_eq!(PosixProfile::bsd().rate_for_speed(resolved.speed), Some(250_000));
    }

    #[test]
    fn test_cygwin_table() {
        let resolved = PosixProfile::cygwin().resolve(128_000).unwrap();
        assert_eq!(resolved.source, BaudSource::Table);
        assert_eq!(resolved.speed, 0x01003 as speed_t);
        assert_eq!(PosixProfile::cygwin().rate_for_speed(resolved.speed), Some(128_000));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_table_matches_libc() {
        for (rate, speed) in LINUX_RATES {
            assert_eq!(symbolic_speed(*rate), Some(*speed as speed_t), "rate {}", rate);
        }
    }

    #[test]
    fn test_profile_selection() {
        assert_eq!(PosixProfile::for_platform(Platform::Linux).stick_parity, Some(LINUX_CMSPAR));
        assert_eq!(PosixProfile::for_platform(Platform::Darwin).stick_parity, None);
        assert_eq!(
            PosixProfile::for_platform(Platform::Darwin).custom_rate,
            Some(CustomRate::IoSsioSpeed)
        );
        assert_eq!(PosixProfile::for_platform(Platform::Bsd).custom_rate, None);
    }
}
