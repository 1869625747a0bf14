//! Backend selection.
//!
//! The platform is an explicit value so callers and tests can ask for a
//! specific backend; [`Platform::current`] picks the one for the running OS.

use super::traits::SerialBackend;
use crate::error::{SerialError, SerialResult};
use std::fmt;
use std::str::FromStr;

/// Operating system families with distinct serial backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Darwin,
    Bsd,
    Cygwin,
    /// Any other POSIX system: termios without extensions.
    Posix,
    Windows,
}

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            Self::Linux
        } else if cfg!(target_vendor = "apple") {
            Self::Darwin
        } else if cfg!(any(
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        )) {
            Self::Bsd
        } else if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    /// Parse an OS identifier such as `linux`, `darwin`, `freebsd14`, `cygwin`
    /// or `win32`. Unknown names map to generic POSIX.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        if name.starts_with("linux") || name == "android" {
            Self::Linux
        } else if name.starts_with("darwin") || name == "macos" || name == "ios" {
            Self::Darwin
        } else if name.starts_with("cygwin") {
            Self::Cygwin
        } else if ["bsd", "freebsd", "netbsd", "openbsd", "dragonfly"]
            .iter()
            .any(|prefix| name.starts_with(prefix))
        {
            Self::Bsd
        } else if name == "win32" || name == "windows" || name == "nt" {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    pub fn is_posix(self) -> bool {
        self != Self::Windows
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Bsd => "bsd",
            Self::Cygwin => "cygwin",
            Self::Posix => "posix",
            Self::Windows => "windows",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

/// Build the backend for `platform`, or fail if this build cannot drive it.
pub fn backend_for(platform: Platform, port: &str) -> SerialResult<Box<dyn SerialBackend>> {
    match platform {
        Platform::Windows => windows_backend(port),
        posix => posix_backend(posix, port),
    }
}

#[cfg(unix)]
fn posix_backend(platform: Platform, port: &str) -> SerialResult<Box<dyn SerialBackend>> {
    use crate::posix::{PosixBackend, PosixProfile};
    Ok(Box::new(PosixBackend::new(
        port,
        PosixProfile::for_platform(platform),
    )))
}

#[cfg(not(unix))]
fn posix_backend(platform: Platform, _port: &str) -> SerialResult<Box<dyn SerialBackend>> {
    Err(SerialError::UnsupportedPlatform(platform.to_string()))
}

#[cfg(windows)]
fn windows_backend(port: &str) -> SerialResult<Box<dyn SerialBackend>> {
    Ok(Box::new(crate::windows::WindowsBackend::new(port)))
}

#[cfg(not(windows))]
fn windows_backend(_port: &str) -> SerialResult<Box<dyn SerialBackend>> {
    Err(SerialError::UnsupportedPlatform(Platform::Windows.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(Platform::from_name("linux"), Platform::Linux);
        assert_eq!(Platform::from_name("Linux2"), Platform::Linux);
        assert_eq!(Platform::from_name("darwin"), Platform::Darwin);
        assert_eq!(Platform::from_name("freebsd14"), Platform::Bsd);
        assert_eq!(Platform::from_name("openbsd7"), Platform::Bsd);
        assert_eq!(Platform::from_name("cygwin"), Platform::Cygwin);
        assert_eq!(Platform::from_name("win32"), Platform::Windows);
        assert_eq!(Platform::from_name("sunos5"), Platform::Posix);
    }

    #[test]
    fn test_current_matches_build() {
        let current = Platform::current();
        assert_eq!(current.is_posix(), cfg!(unix));
    }

    #[test]
    fn test_backend_availability() {
        let windows = backend_for(Platform::Windows, "COM1");
        assert_eq!(windows.is_ok(), cfg!(windows));

        let linux = backend_for(Platform::Linux, "/dev/ttyS0");
        assert_eq!(linux.is_ok(), cfg!(unix));
        if let Err(e) = linux {
            assert!(matches!(e, SerialError::UnsupportedPlatform(_)));
        }
    }

    #[test]
    fn test_backend_starts_closed() {
        if let Ok(backend) = backend_for(Platform::current(), "/dev/null-port") {
            assert!(!backend.is_open());
        }
    }
}
