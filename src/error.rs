//! Error types for snapkeep
//!
//! This module defines all error types that can occur while publishing or
//! purging snapshots. Variants map onto the phases of a run so callers can
//! tell a configuration problem (nothing touched yet) from a failed transfer
//! (staging directory left behind for inspection).

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the snapkeep library
pub type Result<T> = std::result::Result<T, SnapkeepError>;

/// Main error type for all snapkeep operations
#[derive(Debug, Error)]
pub enum SnapkeepError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during YAML deserialization of the configuration file
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Errors during JSON serialization of reports
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be read
    #[error("Cannot read configuration {path:?}: {source}")]
    ConfigRead {
        /// Path of the configuration file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The staging directory could not be cleared or created
    #[error("Staging directory {path:?} unusable: {source}")]
    Staging {
        /// Path of the staging directory
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The copy tool could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        /// Program that was executed
        program: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The copy tool exited with a non-tolerated status
    #[error("Transfer failed: {}", describe_exit(*code))]
    TransferFailed {
        /// Exit code, `None` when the process was killed by a signal
        code: Option<i32>,
    },

    /// Promoting the staging directory to its final name failed
    #[error("Failed to rename {from:?} to {to:?}: {source}")]
    Rename {
        /// Staging directory
        from: PathBuf,
        /// Final snapshot directory
        to: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The destination directory could not be listed
    #[error("Cannot list snapshots in {path:?}: {source}")]
    Listing {
        /// Destination root
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl SnapkeepError {
    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        SnapkeepError::InvalidConfiguration(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SnapkeepError::Internal(msg.into())
    }

    /// Check if this error was raised before any filesystem mutation
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SnapkeepError::ConfigRead { .. }
                | SnapkeepError::InvalidConfiguration(_)
                | SnapkeepError::Yaml(_)
        )
    }

    /// Check if this error comes from the copy tool
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            SnapkeepError::TransferFailed { .. } | SnapkeepError::Spawn { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SnapkeepError::ConfigRead { path, .. } => {
                format!("Configuration file {:?} could not be read. Pass --config <FILE> to point at it.", path)
            }
            SnapkeepError::TransferFailed { code: Some(24) } => {
                "Source files vanished during the transfer. Set 'ignore_vanished_files_error: true' to accept this.".to_string()
            }
            SnapkeepError::TransferFailed { .. } => {
                format!("{}. The staging directory was kept; see rsync.log inside it.", self)
            }
            SnapkeepError::Spawn { program, .. } => {
                format!("Could not run '{}'. Check that it is installed or set 'rsync_binary'.", program)
            }
            SnapkeepError::Rename { .. } => {
                format!("{}. Staging and final directory must live on the same filesystem.", self)
            }
            _ => self.to_string(),
        }
    }
}
