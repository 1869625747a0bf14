//! Shared test utilities for serial-stream tests.
//!
//! - Mock-backed streams for façade tests
//! - Pseudo-terminal pairs for exercising the termios backend without hardware
//! - Helpers that collect received bytes with a timeout

#![allow(dead_code)]

use serial_stream::{MockBackend, PortConfiguration, SerialStream};
use std::time::Duration;

/// How long tests wait for data before giving up.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a closed stream over a mock backend, returning the mock for inspection.
pub fn mock_stream(name: &str) -> (SerialStream, MockBackend) {
    mock_stream_with(PortConfiguration::new(name))
}

pub fn mock_stream_with(config: PortConfiguration) -> (SerialStream, MockBackend) {
    let mock = MockBackend::new(config.port.clone());
    let stream = SerialStream::with_backend(config, Box::new(mock.clone()));
    (stream, mock)
}

/// Create an open stream over a mock backend.
pub async fn open_mock_stream(name: &str) -> (SerialStream, MockBackend) {
    let (stream, mock) = mock_stream(name);
    stream.aopen().await.expect("mock open failed");
    (stream, mock)
}

/// Receive until exactly `len` bytes have arrived.
pub async fn receive_exact(stream: &SerialStream, len: usize) -> Vec<u8> {
    let collect = async {
        let mut received = Vec::with_capacity(len);
        while received.len() < len {
            let chunk = stream
                .receive_some(Some(len - received.len()))
                .await
                .expect("receive failed");
            assert!(!chunk.is_empty(), "unexpected end of stream");
            received.extend_from_slice(&chunk);
        }
        received
    };
    tokio::time::timeout(IO_TIMEOUT, collect)
        .await
        .expect("timed out waiting for data")
}

#[cfg(unix)]
pub mod pty {
    use std::ffi::CStr;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
    use std::ptr;

    /// A pseudo-terminal pair. The stream under test opens `slave_path`; the
    /// test plays the peer through `master`.
    pub struct Pty {
        pub master: File,
        /// Held open so the line does not hang up between opens.
        pub slave: OwnedFd,
        pub slave_path: String,
    }

    impl Pty {
        pub fn open() -> Self {
            let mut master: libc::c_int = -1;
            let mut slave: libc::c_int = -1;
            let rc = unsafe {
                libc::openpty(
                    &mut master,
                    &mut slave,
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            };
            assert_eq!(rc, 0, "openpty failed: {}", std::io::Error::last_os_error());

            let mut name = [0 as libc::c_char; 128];
            let rc = unsafe { libc::ttyname_r(slave, name.as_mut_ptr(), name.len()) };
            assert_eq!(rc, 0, "ttyname_r failed");
            let slave_path = unsafe { CStr::from_ptr(name.as_ptr()) }
                .to_string_lossy()
                .into_owned();

            Self {
                master: unsafe { File::from_raw_fd(master) },
                slave: unsafe { OwnedFd::from_raw_fd(slave) },
                slave_path,
            }
        }

        /// Bytes the peer sends to the stream.
        pub fn peer_write(&mut self, data: &[u8]) {
            self.master.write_all(data).expect("master write failed");
            self.master.flush().expect("master flush failed");
        }

        /// Block until the peer has read exactly `len` bytes.
        pub fn peer_read(&mut self, len: usize) -> Vec<u8> {
            let mut buf = vec![0u8; len];
            self.master.read_exact(&mut buf).expect("master read failed");
            buf
        }

        /// Current attributes of the slave side.
        pub fn slave_termios(&self) -> libc::termios {
            let mut termios: libc::termios = unsafe { std::mem::zeroed() };
            let rc = unsafe { libc::tcgetattr(self.slave.as_raw_fd(), &mut termios) };
            assert_eq!(rc, 0, "tcgetattr failed");
            termios
        }
    }
}
