//! Termios backend tests against a pseudo-terminal.
//!
//! The stream opens the slave side of a pty; the test plays the remote device
//! through the master side. No serial hardware is required.

#![cfg(unix)]

mod common;

use common::pty::Pty;
use common::receive_exact;
use pretty_assertions::assert_eq;
use serial_stream::posix::TermiosState;
use serial_stream::{Parity, Platform, PortConfiguration, SerialError, SerialStream};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

fn open_stream(config: PortConfiguration) -> SerialStream {
    SerialStream::new(config).expect("no backend for this platform")
}

#[tokio::test]
async fn test_open_puts_line_in_raw_mode() {
    let pty = Pty::open();
    let stream = open_stream(PortConfiguration::new(&pty.slave_path).baudrate(9600));

    stream.aopen().await.unwrap();

    let state = TermiosState::from_termios(&pty.slave_termios());
    assert!(state.is_raw());
    assert_eq!(state.cflag & libc::CSIZE, libc::CS8);
    assert_eq!(state.cflag & libc::PARENB, 0);
    assert_ne!(state.cflag & libc::HUPCL, 0);
    assert_eq!(stream.get_baudrate().unwrap(), 9600);
}

#[tokio::test]
async fn test_bytes_flow_both_ways() {
    let mut pty = Pty::open();
    let stream = open_stream(PortConfiguration::new(&pty.slave_path));
    stream.aopen().await.unwrap();

    pty.peer_write(b"hello\r\n");
    assert_eq!(receive_exact(&stream, 7).await, b"hello\r\n");

    stream.send_all(b"world\n").await.unwrap();
    assert_eq!(pty.peer_read(6), b"world\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_large_send_survives_partial_writes() {
    let pty = Pty::open();
    let stream = open_stream(PortConfiguration::new(&pty.slave_path));
    stream.aopen().await.unwrap();

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let len = payload.len();
    let mut master = pty.master.try_clone().unwrap();
    let reader = tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; len];
        master.read_exact(&mut buf).unwrap();
        buf
    });

    stream.send_all(&payload).await.unwrap();

    let echoed = tokio::time::timeout(common::IO_TIMEOUT, reader)
        .await
        .expect("peer did not receive everything")
        .unwrap();
    assert_eq!(echoed, payload);
}

#[tokio::test]
async fn test_xonxoff_and_hangup_toggle() {
    let pty = Pty::open();
    let stream = open_stream(
        PortConfiguration::new(&pty.slave_path)
            .baudrate(9600)
            .xonxoff(true),
    );
    stream.aopen().await.unwrap();

    let before = pty.slave_termios();
    assert_eq!(before.c_iflag & (libc::IXON | libc::IXOFF), libc::IXON | libc::IXOFF);
    assert!(stream.get_hangup().unwrap());

    stream.set_hangup(false).unwrap();

    let after = pty.slave_termios();
    assert!(!stream.get_hangup().unwrap());
    assert_eq!(after.c_cflag & libc::HUPCL, 0);
    assert_eq!(after.c_iflag & (libc::IXON | libc::IXOFF), libc::IXON | libc::IXOFF);
}

#[tokio::test]
async fn test_invalid_bytesize_rejected_on_open_port() {
    let pty = Pty::open();
    let stream = open_stream(PortConfiguration::new(&pty.slave_path));
    stream.aopen().await.unwrap();

    let err = stream.reconfigure(|config| config.bytesize = 9).unwrap_err();

    assert!(matches!(err, SerialError::Configuration { field: "bytesize", .. }));
    assert_eq!(stream.config().bytesize, 8);
    let state = TermiosState::from_termios(&pty.slave_termios());
    assert_eq!(state.cflag & libc::CSIZE, libc::CS8);
}

#[tokio::test]
async fn test_exclusive_lock_conflict() {
    let pty = Pty::open();
    let first = open_stream(PortConfiguration::new(&pty.slave_path).exclusive(true));
    let second = open_stream(PortConfiguration::new(&pty.slave_path).exclusive(true));

    first.aopen().await.unwrap();
    let err = second.aopen().await.unwrap_err();
    assert!(matches!(err, SerialError::ExclusiveAccess { .. }));
    assert!(!second.is_open());

    first.aclose().await.unwrap();
    second.aopen().await.unwrap();
    assert!(second.is_open());
}

#[tokio::test]
async fn test_close_releases_lock_held_by_suspended_receiver() {
    let pty = Pty::open();
    let first = Arc::new(open_stream(
        PortConfiguration::new(&pty.slave_path).exclusive(true),
    ));
    let second = open_stream(PortConfiguration::new(&pty.slave_path).exclusive(true));
    first.aopen().await.unwrap();

    let receiver = {
        let first = Arc::clone(&first);
        tokio::spawn(async move { first.receive_some(None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    first.aclose().await.unwrap();

    second.aopen().await.unwrap();
    assert!(second.is_open());
    let result = tokio::time::timeout(Duration::from_secs(1), receiver)
        .await
        .expect("receiver was not woken")
        .unwrap();
    assert!(result.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_unsupported_parity_for_profile_leaves_port_closed() {
    let pty = Pty::open();
    let stream = SerialStream::with_platform(
        PortConfiguration::new(&pty.slave_path).parity(Parity::Mark),
        Platform::Darwin,
    )
    .unwrap();

    let err = stream.aopen().await.unwrap_err();

    assert!(matches!(err, SerialError::Configuration { field: "parity", .. }));
    assert!(!stream.is_open());
}

#[tokio::test]
async fn test_unsupported_rate_without_custom_escape() {
    let pty = Pty::open();
    let stream = SerialStream::with_platform(
        PortConfiguration::new(&pty.slave_path).baudrate(250_000),
        Platform::Posix,
    )
    .unwrap();

    let err = stream.aopen().await.unwrap_err();

    assert!(matches!(err, SerialError::Configuration { field: "baudrate", .. }));
    assert!(!stream.is_open());
}

#[tokio::test]
async fn test_discard_input_drops_pending_bytes() {
    let mut pty = Pty::open();
    let stream = open_stream(PortConfiguration::new(&pty.slave_path));
    stream.aopen().await.unwrap();

    pty.peer_write(b"stale");
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.discard_input().unwrap();
    pty.peer_write(b"fresh");

    assert_eq!(receive_exact(&stream, 5).await, b"fresh");
}

#[tokio::test]
async fn test_close_wakes_receiver() {
    let pty = Pty::open();
    let stream = Arc::new(open_stream(PortConfiguration::new(&pty.slave_path)));
    stream.aopen().await.unwrap();

    let receiver = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move { stream.receive_some(None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.aclose().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), receiver)
        .await
        .expect("receiver was not woken")
        .unwrap();
    assert!(result.unwrap_err().is_closed());
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_custom_baudrate_via_termios2() {
        let mut pty = Pty::open();
        let stream = open_stream(PortConfiguration::new(&pty.slave_path).baudrate(250_000));

        stream.aopen().await.unwrap();

        assert_eq!(stream.get_baudrate().unwrap(), 250_000);
        stream.send_all(b"ok").await.unwrap();
        assert_eq!(pty.peer_read(2), b"ok");
    }

    #[tokio::test]
    async fn test_high_table_rate() {
        let pty = Pty::open();
        let stream = open_stream(PortConfiguration::new(&pty.slave_path).baudrate(500_000));

        stream.aopen().await.unwrap();

        assert_eq!(stream.get_baudrate().unwrap(), 500_000);
    }

    #[tokio::test]
    async fn test_switch_from_custom_to_standard_rate() {
        let pty = Pty::open();
        let stream = open_stream(PortConfiguration::new(&pty.slave_path).baudrate(250_000));
        stream.aopen().await.unwrap();

        stream.reconfigure(|config| config.baudrate = 9600).unwrap();

        assert_eq!(stream.get_baudrate().unwrap(), 9600);
    }

    #[tokio::test]
    async fn test_mark_parity_uses_cmspar() {
        let pty = Pty::open();
        let stream = open_stream(PortConfiguration::new(&pty.slave_path).parity(Parity::Mark));

        stream.aopen().await.unwrap();

        let cflag = pty.slave_termios().c_cflag;
        assert_ne!(cflag & libc::CMSPAR, 0);
        assert_ne!(cflag & libc::PARODD, 0);
        assert_ne!(cflag & libc::PARENB, 0);
    }

    #[tokio::test]
    async fn test_break_on_pty() {
        let pty = Pty::open();
        let stream = open_stream(PortConfiguration::new(&pty.slave_path));
        stream.aopen().await.unwrap();

        stream.send_break(Duration::from_millis(10)).await.unwrap();
        assert!(stream.is_open());
    }

    #[tokio::test]
    async fn test_close_interrupts_break() {
        let pty = Pty::open();
        let stream = Arc::new(open_stream(PortConfiguration::new(&pty.slave_path)));
        stream.aopen().await.unwrap();

        let breaker = {
            let stream = Arc::clone(&stream);
            tokio::spawn(async move { stream.send_break(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.aclose().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), breaker)
            .await
            .expect("break outlived the close")
            .unwrap();
        assert!(result.unwrap_err().is_closed());
    }
}
