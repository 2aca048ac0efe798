//! Configuration file
//!
//! A run is described by a YAML file:
//!
//! ```yaml
//! destination: /backups/host
//! snapshot_prefix: host
//! source:
//!   - /home
//!   - /etc
//! exclude:
//!   - "*.cache"
//! keep:
//!   daily: 7
//!   weekly: 4
//!   monthly: 6
//! rsync_extra_flags: "--numeric-ids"
//! ignore_vanished_files_error: true
//! ```
//!
//! `mode: simple` mirrors the sources into `destination` without snapshots
//! or retention. Unknown keys are rejected so typos do not silently fall
//! back to defaults.

use crate::error::{Result, SnapkeepError};
use crate::types::{BackupMode, KeepPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Default snapshot name prefix
pub const DEFAULT_PREFIX: &str = "snapshot";

/// Default copy tool executable
pub const DEFAULT_RSYNC_BINARY: &str = "rsync";

/// Parsed configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Snapshot or simple mirror mode
    #[serde(default)]
    pub mode: BackupMode,
    /// Destination root
    pub destination: String,
    /// Prefix of snapshot directory names
    #[serde(default = "default_prefix")]
    pub snapshot_prefix: String,
    /// Source paths, in order
    #[serde(default)]
    pub source: Vec<String>,
    /// Exclude patterns
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Retention policy; required in snapshot mode
    #[serde(default)]
    pub keep: Option<KeepPolicy>,
    /// Extra flags appended to the rsync command line
    #[serde(default)]
    pub rsync_extra_flags: String,
    /// Treat rsync exit status 24 (vanished source files) as success
    #[serde(default)]
    pub ignore_vanished_files_error: bool,
    /// rsync executable
    #[serde(default = "default_rsync_binary")]
    pub rsync_binary: String,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_rsync_binary() -> String {
    DEFAULT_RSYNC_BINARY.to_string()
}

impl Config {
    /// Read, parse and validate a configuration file
    ///
    /// # Errors
    ///
    /// - [`SnapkeepError::ConfigRead`] if the file cannot be read
    /// - [`SnapkeepError::Yaml`] if it is not valid YAML for this schema
    /// - [`SnapkeepError::InvalidConfiguration`] if validation fails
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| SnapkeepError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded configuration from {:?}", path);
        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.destination.trim().is_empty() {
            return Err(SnapkeepError::config("'destination' must be set"));
        }
        if self.source.is_empty() {
            return Err(SnapkeepError::config("'source' must list at least one path"));
        }
        if self.source.iter().any(|s| s.trim().is_empty()) {
            return Err(SnapkeepError::config("'source' entries must not be empty"));
        }
        if self.mode == BackupMode::Snapshot {
            validate_prefix(&self.snapshot_prefix)?;
            if self.keep.is_none() {
                return Err(SnapkeepError::config(
                    "'keep' must be set in snapshot mode (daily, weekly, monthly)",
                ));
            }
        }
        Ok(())
    }

    /// Retention policy, all-zero when absent
    pub fn keep_policy(&self) -> KeepPolicy {
        self.keep.unwrap_or_default()
    }
}

/// Check that `prefix` yields snapshot names the listing will recognise
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(SnapkeepError::config("'snapshot_prefix' must not be empty"));
    }
    if crate::layout::is_reserved(prefix) {
        return Err(SnapkeepError::config(format!(
            "'snapshot_prefix' must not start with '{}'",
            crate::layout::RESERVED_MARKER
        )));
    }
    if prefix.contains('/') || prefix.contains(std::path::MAIN_SEPARATOR) {
        return Err(SnapkeepError::config(
            "'snapshot_prefix' must not contain a path separator",
        ));
    }
    Ok(())
}
