//! Configuration for serial-stream.
//!
//! TOML-based configuration with environment variable overrides, used by the
//! `serial-cat` binary and available to embedders.
//!
//! See [`ConfigLoader::load`] for where the file is looked for and which
//! `SERIAL_STREAM_*` variables override it. Port names given on the command
//! line or in `serial.port` go through `serial.port_aliases` first.
//!
//! A typical file:
//!
//! ```toml
//! [serial]
//! port = "gps"
//! baudrate = 9600
//! parity = "none"
//! stopbits = "one"
//!
//! [serial.port_aliases]
//! gps = "/dev/ttyUSB0"
//!
//! [logging]
//! level = "debug"
//! format = "pretty"
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{locate_config_file, user_config_dir, user_config_file, ConfigLoader};
pub use schema::{Config, LogFormat, LoggingConfig, SerialConfig};
