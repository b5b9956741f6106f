//! Settings for [`DealModule`](crate::DealModule) and
//! [`DealExecutor`](crate::DealExecutor).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time a watch session waits for the consumer before dropping an event.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

const IMPORTS_FOLDER_NAME: &str = "imports";

/// Deal module settings.
///
/// # Example
///
/// ```ignore
/// let cfg = DealsConfig::from_repo_path("/var/lib/dealwarden")?
///     .with_write_timeout(Duration::from_millis(500));
/// let module = DealModule::new(api, cfg)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealsConfig {
    /// Directory holding staged payloads while they are imported.
    pub import_path: PathBuf,
    /// How long a watch session blocks on a full event channel.
    #[serde(default = "default_write_timeout", with = "duration_ms")]
    pub write_timeout: Duration,
    /// Upper bound on one deal-info fetch. `None` waits forever.
    #[serde(default, with = "opt_duration_ms")]
    pub fetch_timeout: Option<Duration>,
    /// Capacity of each watch session's event channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_write_timeout() -> Duration {
    DEFAULT_WRITE_TIMEOUT
}

fn default_channel_capacity() -> usize {
    1
}

impl DealsConfig {
    pub fn new(import_path: impl Into<PathBuf>) -> Self {
        Self {
            import_path: import_path.into(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            fetch_timeout: None,
            channel_capacity: default_channel_capacity(),
        }
    }

    /// Stage imports under `<repo>/imports`, creating the folder if needed.
    pub fn from_repo_path(repo: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let import_path = repo.as_ref().join(IMPORTS_FOLDER_NAME);
        std::fs::create_dir_all(&import_path)?;
        Ok(Self::new(import_path))
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.import_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyImportPath);
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::Zero("write_timeout"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero("channel_capacity"));
        }
        Ok(())
    }
}

/// Executor settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on one redo call. `None` waits forever.
    #[serde(default, with = "opt_duration_ms")]
    pub redo_timeout: Option<Duration>,
}

impl ExecutorConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(raw)?;
        if cfg.redo_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Zero("redo_timeout"));
        }
        Ok(cfg)
    }

    pub fn with_redo_timeout(mut self, timeout: Duration) -> Self {
        self.redo_timeout = Some(timeout);
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_applies_defaults() {
        let cfg = DealsConfig::from_json(r#"{"import_path": "/tmp/imports"}"#).unwrap();
        assert_eq!(cfg.import_path, PathBuf::from("/tmp/imports"));
        assert_eq!(cfg.write_timeout, DEFAULT_WRITE_TIMEOUT);
        assert_eq!(cfg.fetch_timeout, None);
        assert_eq!(cfg.channel_capacity, 1);
    }

    #[test]
    fn test_from_json_reads_millis() {
        let cfg = DealsConfig::from_json(
            r#"{"import_path": "/tmp/i", "write_timeout": 250, "fetch_timeout": 5000}"#,
        )
        .unwrap();
        assert_eq!(cfg.write_timeout, Duration::from_millis(250));
        assert_eq!(cfg.fetch_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_empty_import_path_rejected() {
        let err = DealsConfig::from_json(r#"{"import_path": ""}"#).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyImportPath));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let cfg = DealsConfig::new("/tmp").with_channel_capacity(0);
        assert!(matches!(cfg.validate(), Err(ConfigError::Zero("channel_capacity"))));
    }

    #[test]
    fn test_from_repo_path_creates_imports_dir() {
        let repo = tempfile::tempdir().unwrap();
        let cfg = DealsConfig::from_repo_path(repo.path()).unwrap();
        assert_eq!(cfg.import_path, repo.path().join("imports"));
        assert!(cfg.import_path.is_dir());
    }

    #[test]
    fn test_executor_config_json() {
        let cfg = ExecutorConfig::from_json(r#"{"redo_timeout": 1500}"#).unwrap();
        assert_eq!(cfg.redo_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(ExecutorConfig::from_json("{}").unwrap(), ExecutorConfig::default());
        assert!(ExecutorConfig::from_json(r#"{"redo_timeout": 0}"#).is_err());
    }
}
