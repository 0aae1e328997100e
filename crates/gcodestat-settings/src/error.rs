//! Errors raised while loading, saving or validating a printer config.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure reading or writing a config file
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("cannot access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Serialising the config for `save_to_file` failed.
    #[error("cannot serialise config: {0}")]
    Serialize(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SettingsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A config that parsed but cannot drive the processor
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config key '{0}' is missing or empty")]
    MissingKey(String),

    /// Only `.toml` and `.json` are understood.
    #[error("unsupported config file extension '{0}'")]
    UnsupportedFormat(String),

    #[error("config value {key} = {value} is out of range")]
    ValueOutOfRange { key: String, value: String },
}

impl ConfigError {
    pub fn out_of_range(key: impl Into<String>, value: impl ToString) -> Self {
        Self::ValueOutOfRange {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::MissingKey("extruders.filament_diameters".to_string());
        assert_eq!(
            err.to_string(),
            "config key 'extruders.filament_diameters' is missing or empty"
        );

        let err = ConfigError::out_of_range("machine_max_acceleration_travel", 0.0);
        assert_eq!(
            err.to_string(),
            "config value machine_max_acceleration_travel = 0 is out of range"
        );
    }

    #[test]
    fn test_io_error_names_the_file() {
        let err = SettingsError::io(
            "/etc/gcodestat/printer.toml",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/etc/gcodestat/printer.toml"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_validation_error_is_transparent() {
        let err: SettingsError = ConfigError::UnsupportedFormat("yaml".to_string()).into();
        assert_eq!(err.to_string(), "unsupported config file extension 'yaml'");
    }
}
