//! Portable serial stream layer.
//!
//! [`SerialStream`] is the façade applications use; it delegates OS work to a
//! [`SerialBackend`] chosen by [`Platform`].

pub mod conflict;
pub mod mock;
pub mod platform;
pub mod stream;
pub mod traits;

pub use conflict::{ConflictDetector, ConflictGuard};
pub use mock::MockBackend;
pub use platform::{backend_for, Platform};
pub use stream::SerialStream;
pub use traits::*;
