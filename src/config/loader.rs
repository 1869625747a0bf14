//! Locates, reads and writes the TOML file behind [`Config`].

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use std::path::{Path, PathBuf};
use tracing::debug;

const ENV_PREFIX: &str = "SERIAL_STREAM";

/// Explicit file path; wins over every other location.
const PATH_VAR: &str = "SERIAL_STREAM_CONFIG";

const LOCAL_FILE: &str = "serial-stream.toml";
const USER_DIR: &str = "serial-stream";
const USER_FILE: &str = "config.toml";

/// A [`Config`] and the file it was read from, if any.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub config_path: Option<PathBuf>,
    pub config: Config,
}

impl ConfigLoader {
    /// Read the first file found, in order:
    ///
    /// 1. the path in `SERIAL_STREAM_CONFIG`
    /// 2. `./serial-stream.toml`
    /// 3. `serial-stream/config.toml` under `$XDG_CONFIG_HOME` (else `~/.config`),
    ///    or under `%APPDATA%` on Windows
    ///
    /// With no file the defaults are used. `SERIAL_STREAM_PORT`,
    /// `SERIAL_STREAM_BAUDRATE` and `SERIAL_STREAM_LOG_LEVEL` are applied last.
    pub fn load() -> ConfigResult<Self> {
        let config_path = locate_config_file();
        let config = read_layered(config_path.as_deref())?;
        debug!(path = ?config_path, "Configuration loaded");
        Ok(Self {
            config_path,
            config,
        })
    }

    /// Read `path`, which must exist.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let config = read_layered(Some(path))?;
        Ok(Self {
            config_path: Some(path.to_path_buf()),
            config,
        })
    }

    /// Defaults plus environment overrides. An unparsable override is skipped.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        let _ = apply_env_overrides(&mut config);
        Self {
            config_path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    pub fn save(&self) -> ConfigResult<()> {
        let path = self.config_path.as_deref().ok_or(ConfigError::NoPath)?;
        write_file(&self.config, path)
    }

    /// Write to `path`, creating parent directories.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        write_file(&self.config, path.as_ref())
    }

    /// Re-read the backing file. Without one this does nothing.
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(path) = self.config_path.as_deref() {
            self.config = read_layered(Some(path))?;
        }
        Ok(())
    }
}

/// File contents (or defaults), then environment overrides, then validation.
fn read_layered(path: Option<&Path>) -> ConfigResult<Config> {
    let mut config = match path {
        Some(path) => {
            let text =
                std::fs::read_to_string(path).map_err(|e| ConfigError::io("read", path, e))?;
            toml::from_str(&text)?
        }
        None => Config::default(),
    };
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

fn write_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::io("create directory", parent, e))?;
    }
    let text = toml::to_string_pretty(config)?;
    std::fs::write(path, text).map_err(|e| ConfigError::io("write", path, e))
}

fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    let var = |name: &str| std::env::var(format!("{}_{}", ENV_PREFIX, name)).ok();

    if let Some(port) = var("PORT") {
        config.serial.port = Some(port);
    }
    if let Some(value) = var("BAUDRATE") {
        config.serial.baudrate = value.parse().map_err(|_| ConfigError::Env {
            var: format!("{}_BAUDRATE", ENV_PREFIX),
            value,
            message: "expected a baud rate",
        })?;
    }
    if let Some(level) = var("LOG_LEVEL") {
        config.logging.level = level;
    }
    Ok(())
}

/// The file [`ConfigLoader::load`] would read, if one exists.
pub fn locate_config_file() -> Option<PathBuf> {
    let explicit = std::env::var_os(PATH_VAR).map(PathBuf::from);
    let local = Some(PathBuf::from(LOCAL_FILE));
    [explicit, local, user_config_file()]
        .into_iter()
        .flatten()
        .find(|path| path.exists())
}

/// Per-user directory holding `config.toml`.
pub fn user_config_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    let root = std::env::var_os("APPDATA").map(PathBuf::from);

    #[cfg(not(windows))]
    let root = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));

    root.map(|dir| dir.join(USER_DIR))
}

pub fn user_config_file() -> Option<PathBuf> {
    user_config_dir().map(|dir| dir.join(USER_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Parity;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    fn clear_env() {
        for var in [
            "SERIAL_STREAM_CONFIG",
            "SERIAL_STREAM_PORT",
            "SERIAL_STREAM_BAUDRATE",
            "SERIAL_STREAM_LOG_LEVEL",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_default_loader() {
        clear_env();
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.baudrate, 115200);
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        clear_env();
        env::set_var("SERIAL_STREAM_PORT", "/dev/ttyUSB3");
        env::set_var("SERIAL_STREAM_BAUDRATE", "57600");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(loader.config().serial.baudrate, 57600);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_bad_env_override_is_reported() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial.toml");
        std::fs::write(&path, "").unwrap();
        env::set_var("SERIAL_STREAM_BAUDRATE", "fast");

        let err = ConfigLoader::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial.toml");
        std::fs::write(
            &path,
            "[serial]\nport = \"/dev/ttyS2\"\nbaudrate = 19200\nparity = \"odd\"\n",
        )
        .unwrap();

        let loader = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(loader.config().serial.baudrate, 19200);
        assert_eq!(loader.config().serial.parity, Parity::Odd);
        assert_eq!(loader.config_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    #[serial]
    fn test_load_missing_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let err = ConfigLoader::load_from(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    #[serial]
    fn test_invalid_file_is_rejected() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial.toml");
        std::fs::write(&path, "[serial]\nbytesize = 9\n").unwrap();

        let err = ConfigLoader::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    #[serial]
    fn test_explicit_path_env() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[serial]\nbaudrate = 4800\n").unwrap();
        env::set_var("SERIAL_STREAM_CONFIG", &path);

        assert_eq!(locate_config_file().as_deref(), Some(path.as_path()));
        let loader = ConfigLoader::load().unwrap();
        assert_eq!(loader.config().serial.baudrate, 4800);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_save_and_reload() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("serial.toml");

        let mut loader = ConfigLoader::with_defaults();
        loader.config_mut().serial.baudrate = 38400;
        loader
            .config_mut()
            .serial
            .port_aliases
            .insert("scope".to_string(), "/dev/ttyACM1".to_string());
        loader.save_to(&path).unwrap();

        let mut reloaded = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(reloaded.config(), loader.config());

        std::fs::write(&path, "[serial]\nbaudrate = 1200\n").unwrap();
        reloaded.reload().unwrap();
        assert_eq!(reloaded.config().serial.baudrate, 1200);
    }

    #[test]
    fn test_save_without_path() {
        let loader = ConfigLoader {
            config_path: None,
            config: Config::default(),
        };
        assert!(matches!(
            loader.save(),
            Err(ConfigError::NoPath)
        ));
    }
}
