//! Construction-time configuration, optionally loaded from a JSON file.
use crate::error::{CoreError, Result};
use crate::interceptors::ExpectedErrors;
use crate::persistence::HISTORY_KEY;
use crate::store::DEFAULT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Maximum number of retained entries.
    pub capacity: usize,
    pub persistence: PersistenceConfig,
    pub scanner: ScannerConfig,
    /// Network failures downgraded from `error` to `warn`.
    pub expected_errors: ExpectedErrors,
    /// Attach a backtrace to uncaught panic entries.
    pub capture_backtraces: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            persistence: PersistenceConfig::default(),
            scanner: ScannerConfig::default(),
            expected_errors: ExpectedErrors::default(),
            capture_backtraces: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Directory of the `sled` database. Required when enabled.
    pub path: Option<PathBuf>,
    pub key: String,
    /// Largest serialized history, in bytes, that will be written.
    pub quota_bytes: Option<usize>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            key: HISTORY_KEY.to_string(),
            quota_bytes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub enabled: bool,
    pub warmup_ms: u64,
    pub interval_ms: u64,
    /// Sizes at or below this many pixels count as collapsed.
    pub threshold_px: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            warmup_ms: 2_000,
            interval_ms: 5_000,
            threshold_px: 2,
        }
    }
}

impl ScannerConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl CoreConfig {
    /// Loads a configuration file, filling unspecified fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: CoreConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(CoreError::Config("capacity must be at least 1".into()));
        }
        if self.persistence.enabled {
            if self.persistence.path.is_none() {
                return Err(CoreError::Config(
                    "persistence is enabled but no path is set".into(),
                ));
            }
            if self.persistence.key.is_empty() {
                return Err(CoreError::Config("persistence key is empty".into()));
            }
        }
        if self.scanner.enabled && self.scanner.interval_ms == 0 {
            return Err(CoreError::Config("scanner interval must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "capacity": 500,
                "persistence": {{"enabled": true, "path": "/tmp/logtap"}},
                "expected_errors": [
                    {{"host": {{"exact": "api.example.com"}}, "status": {{"exact": 404}}}}
                ]
            }}"#
        )
        .unwrap();

        let config = CoreConfig::load(file.path()).unwrap();
        assert_eq!(config.capacity, 500);
        assert_eq!(config.persistence.key, "console_logs");
        assert!(!config.scanner.enabled);
        assert_eq!(config.scanner.interval(), Duration::from_secs(5));
        assert!(config.expected_errors.is_expected("api.example.com", 404));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let zero = CoreConfig {
            capacity: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(zero.validate(), Err(CoreError::Config(_))));

        let mut no_path = CoreConfig::default();
        no_path.persistence.enabled = true;
        assert!(matches!(no_path.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn malformed_file_is_a_serialize_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ capacity: ").unwrap();
        assert!(matches!(
            CoreConfig::load(file.path()),
            Err(CoreError::Serialize(_))
        ));
    }
}
