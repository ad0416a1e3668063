use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::ledger::DEFAULT_DATE_LABEL_FORMAT;

pub const CONFIG_FILE: &str = "config.toml";
pub const LOG_FILTER_ENV: &str = "CHRONOS_PUNCH_LOG";
const DEFAULT_LOG_FILTER: &str = "chronos_punchcard=info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("date_label_format `{0}` does not read back the dates it writes")]
    DateLabelFormat(String),
    #[error("log_filter `{filter}` is not a valid filter: {reason}")]
    LogFilter { filter: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_filter: String,
    pub date_label_format: String,
    pub csv_include_backups: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            date_label_format: DEFAULT_DATE_LABEL_FORMAT.to_string(),
            csv_include_backups: false,
        }
    }
}

impl Config {
    /// `CHRONOS_PUNCH_LOG` wins over the configured filter.
    pub fn effective_log_filter(&self) -> String {
        env::var(LOG_FILTER_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.log_filter.clone())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Err(err) = EnvFilter::try_new(&self.log_filter) {
            return Err(ConfigError::LogFilter {
                filter: self.log_filter.clone(),
                reason: err.to_string(),
            });
        }

        // Rollover reads month and year back out of stored day labels.
        let sample = NaiveDate::from_ymd_opt(2026, 11, 7)
            .ok_or_else(|| ConfigError::DateLabelFormat(self.date_label_format.clone()))?;
        let mut rendered = String::new();
        if std::fmt::write(
            &mut rendered,
            format_args!("{}", sample.format(&self.date_label_format)),
        )
        .is_err()
        {
            return Err(ConfigError::DateLabelFormat(self.date_label_format.clone()));
        }

        match NaiveDate::parse_from_str(&rendered, &self.date_label_format) {
            Ok(parsed) if parsed == sample => Ok(()),
            _ => Err(ConfigError::DateLabelFormat(self.date_label_format.clone())),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Config::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let config: Config = toml::from_str(&raw).map_err(|source| ConfigError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Writes the default config unless one already exists. Returns whether a file was written.
pub fn write_default_config(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }

    let rendered = toml::to_string_pretty(&Config::default())?;
    fs::write(path, rendered).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{Config, ConfigError, load_config, write_default_config};

    #[test]
    fn missing_config_uses_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(&dir.path().join("config.toml")).expect("defaults should load");
        assert_eq!(config, Config::default());
        assert_eq!(config.date_label_format, "%b %-d, %Y");
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "csv_include_backups = true\n").expect("write fixture");
        let config = load_config(&path).expect("config should load");
        assert!(config.csv_include_backups);
        assert_eq!(config.log_filter, Config::default().log_filter);
    }

    #[test]
    fn rejects_date_formats_that_lose_the_month() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "date_label_format = \"%d\"\n").expect("write fixture");
        assert!(matches!(load_config(&path), Err(ConfigError::DateLabelFormat(_))));

        fs::write(&path, "date_label_format = \"%Y-%m-%d\"\n").expect("write fixture");
        assert!(load_config(&path).is_ok());
    }

    #[test]
    fn rejects_unparseable_log_filters() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "log_filter = \"chronos_punchcard=notalevel\"\n").expect("write fixture");
        assert!(matches!(load_config(&path), Err(ConfigError::LogFilter { .. })));

        fs::write(&path, "log_filter = \"chronos_punchcard=debug,warn\"\n").expect("write fixture");
        assert!(load_config(&path).is_ok());
    }

    #[test]
    fn default_config_is_written_once() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        assert!(write_default_config(&path).expect("write should succeed"));
        assert!(!write_default_config(&path).expect("second call is a no-op"));
        assert_eq!(load_config(&path).expect("config should load"), Config::default());
    }
}
