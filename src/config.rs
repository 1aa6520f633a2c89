//! Merge Configuration
//!
//! Loaded from a YAML file (`--config` or `OUG_MERGE_CONFIG`), falling back
//! to defaults, then adjusted by environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::schema::SystemFields;

pub const CONFIG_ENV: &str = "OUG_MERGE_CONFIG";
pub const MAX_SELECTION_ENV: &str = "OUG_MERGE_MAX_SELECTION";
pub const LOG_DIR_ENV: &str = "OUG_MERGE_LOG_DIR";

pub const PROCESSOR_VERSION: &str = "OUG Merge Processor v1.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub system_fields: SystemFields,
    /// Selection merge refuses selections of this size or more.
    pub selection_max: usize,
    pub common_parcel_max: usize,
    /// Written into PROCESSOR on every merged parcel.
    pub processor: String,
    /// Workspace the per-invocation scratch datasets live in.
    pub scratch_prefix: String,
    pub log_dir: PathBuf,
    pub log_file: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            system_fields: SystemFields::default(),
            selection_max: 50,
            common_parcel_max: 2,
            processor: PROCESSOR_VERSION.to_string(),
            scratch_prefix: "memory".to_string(),
            log_dir: PathBuf::from("."),
            log_file: "logfile".to_string(),
        }
    }
}

impl MergeConfig {
    /// Resolve the configuration the CLI runs with.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&yaml).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply `OUG_MERGE_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(max) = lookup(MAX_SELECTION_ENV) {
            self.selection_max = max
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer, got '{}'", MAX_SELECTION_ENV, max))?;
        }
        if let Some(dir) = lookup(LOG_DIR_ENV) {
            self.log_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = MergeConfig::default();
        assert_eq!(config.selection_max, 50);
        assert_eq!(config.common_parcel_max, 2);
        assert_eq!(config.processor, "OUG Merge Processor v1.1");
        assert_eq!(config.log_path(), PathBuf::from("./logfile"));
        assert!(config.system_fields.is_insoluble("OBJECTID"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("merge.yaml");
        fs::write(
            &path,
            "selection_max: 10\nsystem_fields:\n  insolubles: [OBJECTID, Shape, GlobalID]\n",
        )
        .unwrap();

        let config = MergeConfig::from_file(&path).unwrap();

        assert_eq!(config.selection_max, 10);
        assert_eq!(config.common_parcel_max, 2);
        assert!(config.system_fields.is_insoluble("GlobalID"));
        assert!(config.system_fields.is_measure("SHAPE_Area"));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [(MAX_SELECTION_ENV, "25"), (LOG_DIR_ENV, "/var/log/oug")].into();
        let mut config = MergeConfig::default();

        config.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.selection_max, 25);
        assert_eq!(config.log_path(), PathBuf::from("/var/log/oug/logfile"));
    }

    #[test]
    fn test_bad_override_is_reported() {
        let mut config = MergeConfig::default();
        let err = config
            .apply_overrides(|k| (k == MAX_SELECTION_ENV).then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(MAX_SELECTION_ENV));
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = MergeConfig::from_file(Path::new("/nonexistent/merge.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
