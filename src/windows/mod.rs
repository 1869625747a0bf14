//! Windows COM port support.
//!
//! The DCB codec is plain data and builds everywhere; the overlapped backend
//! only on Windows.

pub mod codec;

#[cfg(windows)]
mod backend;

#[cfg(windows)]
pub use backend::WindowsBackend;
pub use codec::{
    decode_dcb, device_path, encode_dcb, is_retriable_read_error, CommTimeouts, DcbSettings,
    ReadBuffer,
};
