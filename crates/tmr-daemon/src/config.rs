use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, DaemonResult};

/// Daemon settings, usually read from a TOML file. Missing keys take their
/// defaults.
///
/// ```toml
/// log_path = "/var/lib/tmr/store.log"
/// mirror_root = "/srv/mirror"
/// marker_path = "/var/lib/tmr/tmr.marker"
/// interval_ms = 500
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Transaction log to follow.
    pub log_path: PathBuf,
    /// Directory receiving the mirrored tree.
    pub mirror_root: PathBuf,
    /// Durable marker file. Must live outside `mirror_root`.
    pub marker_path: PathBuf,
    /// Pause between cycles.
    pub interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("tmr.log"),
            mirror_root: PathBuf::from("mirror"),
            marker_path: PathBuf::from("tmr.marker"),
            interval_ms: 1000,
        }
    }
}

impl DaemonConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> DaemonResult<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::from_toml(&contents)
            .map_err(|e| DaemonError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> DaemonResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| DaemonError::Config(format!("failed to parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DaemonResult<()> {
        if self.interval_ms == 0 {
            return Err(DaemonError::Config("interval_ms must be positive".into()));
        }
        if self.marker_path.starts_with(&self.mirror_root) {
            return Err(DaemonError::Config(format!(
                "marker {} must not live inside the mirror root {}",
                self.marker_path.display(),
                self.mirror_root.display()
            )));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = DaemonConfig::default();
        assert_eq!(c.mirror_root, PathBuf::from("mirror"));
        assert_eq!(c.marker_path, PathBuf::from("tmr.marker"));
        assert_eq!(c.interval(), Duration::from_secs(1));
        c.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let c = DaemonConfig::from_toml("log_path = \"/data/store.log\"\ninterval_ms = 250\n").unwrap();
        assert_eq!(c.log_path, PathBuf::from("/data/store.log"));
        assert_eq!(c.interval_ms, 250);
        assert_eq!(c.mirror_root, PathBuf::from("mirror"));
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(DaemonConfig::from_toml("log = \"x\"").is_err());
        assert!(DaemonConfig::from_toml("interval_ms = 0").is_err());
        assert!(matches!(
            DaemonConfig::from_toml("mirror_root = \"/m\"\nmarker_path = \"/m/marker\""),
            Err(DaemonError::Config(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DaemonConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
