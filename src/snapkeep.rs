//! Main snapkeep implementation
//!
//! This module provides the high-level API for one backup destination. A
//! [`Snapkeep`] ties together the destination layout, the copy tool, the
//! publish options and the keep policy, and exposes the operations a run is
//! made of: publish a snapshot, purge old ones, or both.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use snapkeep::{KeepPolicy, SnapkeepBuilder};
//!
//! # fn main() -> snapkeep::Result<()> {
//! let snapkeep = SnapkeepBuilder::new()
//!     .destination("/backups/host")
//!     .prefix("host")
//!     .sources(vec!["/home".to_string(), "/etc".to_string()])
//!     .excludes(vec!["*.cache".to_string()])
//!     .keep(KeepPolicy::new(7, 4, 6))
//!     .build()?;
//!
//! let summary = snapkeep.run()?;
//! println!("Published {}", summary.publish.snapshot_name);
//! # Ok(())
//! # }
//! ```

use crate::config::{self, Config};
use crate::error::{Result, SnapkeepError};
use crate::layout::Destination;
use crate::publisher::{PublishOptions, SnapshotPublisher};
use crate::retention::{RetentionEngine, RetentionPlan};
use crate::transfer::{CopyTool, Rsync};
use crate::types::{BackupMode, KeepPolicy, PublishResult, PurgeReport, RunSummary, Snapshot};
use chrono::{DateTime, Local};
use std::path::PathBuf;
use tracing::{info, instrument};

/// Snapshot manager for one destination
#[derive(Debug)]
pub struct Snapkeep {
    destination: Destination,
    mode: BackupMode,
    options: PublishOptions,
    policy: KeepPolicy,
    tool: Box<dyn CopyTool>,
}

impl Snapkeep {
    /// Build a manager from a parsed configuration
    ///
    /// # Errors
    ///
    /// [`SnapkeepError::InvalidConfiguration`] if the configuration does not
    /// describe a usable run.
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        SnapkeepBuilder::from_config(config).dry_run(dry_run).build()
    }

    /// Destination layout
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Mode this manager runs in
    pub fn mode(&self) -> BackupMode {
        self.mode
    }

    /// Keep policy applied by [`Snapkeep::purge`]
    pub fn policy(&self) -> &KeepPolicy {
        &self.policy
    }

    /// Whether operations only report what they would do
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Publish a snapshot named after the current local time
    #[instrument(skip(self))]
    pub fn snapshot(&self) -> Result<PublishResult> {
        self.snapshot_at(Local::now())
    }

    /// Publish a snapshot named after `now`
    ///
    /// # Errors
    ///
    /// Any staging, transfer or rename failure; see
    /// [`SnapshotPublisher::publish`].
    #[instrument(skip(self), fields(root = %self.destination.root().display()))]
    pub fn snapshot_at(&self, now: DateTime<Local>) -> Result<PublishResult> {
        self.publisher().publish(now)
    }

    /// Mirror the sources into the destination root (simple mode)
    #[instrument(skip(self))]
    pub fn mirror(&self) -> Result<PublishResult> {
        self.publisher().mirror()
    }

    /// Delete every snapshot outside the keep set
    #[instrument(skip(self), fields(policy = %self.policy))]
    pub fn purge(&self) -> Result<PurgeReport> {
        self.retention().purge()
    }

    /// Compute the keep set without deleting anything
    pub fn plan(&self) -> Result<RetentionPlan> {
        self.retention().plan()
    }

    /// All snapshots in the destination, oldest first
    pub fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        self.destination.list_snapshots()
    }

    /// Run the configured mode end to end
    ///
    /// Snapshot mode publishes and then purges; a failed publish ends the run
    /// before retention is considered. Simple mode only mirrors.
    #[instrument(skip(self), fields(mode = ?self.mode, dry_run = self.options.dry_run))]
    pub fn run(&self) -> Result<RunSummary> {
        match self.mode {
            BackupMode::Simple => {
                let publish = self.mirror()?;
                Ok(RunSummary {
                    mode: self.mode,
                    publish,
                    purge: None,
                })
            }
            BackupMode::Snapshot => {
                let publish = self.snapshot()?;
                info!("Published {}, starting retention pass", publish.snapshot_name);
                let purge = self.purge()?;
                Ok(RunSummary {
                    mode: self.mode,
                    publish,
                    purge: Some(purge),
                })
            }
        }
    }

    fn publisher(&self) -> SnapshotPublisher<'_> {
        SnapshotPublisher::new(&self.destination, self.tool.as_ref(), &self.options)
    }

    fn retention(&self) -> RetentionEngine<'_> {
        RetentionEngine::new(&self.destination, self.policy, self.options.dry_run)
    }
}

/// Builder for configuring a [`Snapkeep`]
///
/// # Examples
///
/// ```rust
/// use snapkeep::{BackupMode, SnapkeepBuilder};
///
/// let snapkeep = SnapkeepBuilder::new()
///     .mode(BackupMode::Simple)
///     .destination("/srv/mirror")
///     .sources(vec!["/data/".to_string()])
///     .build()
///     .unwrap();
/// assert_eq!(snapkeep.mode(), BackupMode::Simple);
/// ```
#[derive(Debug)]
pub struct SnapkeepBuilder {
    destination: PathBuf,
    prefix: String,
    sources: Vec<String>,
    excludes: Vec<String>,
    extra_flags: String,
    policy: KeepPolicy,
    tolerate_vanished: bool,
    dry_run: bool,
    mode: BackupMode,
    tool: Option<Box<dyn CopyTool>>,
}

impl SnapkeepBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            destination: PathBuf::new(),
            prefix: config::DEFAULT_PREFIX.to_string(),
            sources: Vec::new(),
            excludes: Vec::new(),
            extra_flags: String::new(),
            policy: KeepPolicy::default(),
            tolerate_vanished: false,
            dry_run: false,
            mode: BackupMode::default(),
            tool: None,
        }
    }

    /// Pre-populate every setting from a configuration file
    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .mode(config.mode)
            .destination(&config.destination)
            .prefix(&config.snapshot_prefix)
            .sources(config.source.clone())
            .excludes(config.exclude.clone())
            .extra_flags(&config.rsync_extra_flags)
            .keep(config.keep_policy())
            .tolerate_vanished(config.ignore_vanished_files_error)
            .copy_tool(Box::new(Rsync::with_binary(&config.rsync_binary)))
    }

    /// Set the destination root
    pub fn destination(mut self, root: impl Into<PathBuf>) -> Self {
        self.destination = root.into();
        self
    }

    /// Set the snapshot name prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the source paths, in order
    pub fn sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    /// Set the exclude patterns
    pub fn excludes(mut self, patterns: Vec<String>) -> Self {
        self.excludes = patterns;
        self
    }

    /// Set extra copy tool flags (split on whitespace)
    pub fn extra_flags(mut self, flags: impl Into<String>) -> Self {
        self.extra_flags = flags.into();
        self
    }

    /// Set the keep policy
    pub fn keep(mut self, policy: KeepPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Accept vanished source files as success
    pub fn tolerate_vanished(mut self, tolerate: bool) -> Self {
        self.tolerate_vanished = tolerate;
        self
    }

    /// Report instead of mutate
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set snapshot or simple mode
    pub fn mode(mut self, mode: BackupMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the copy tool (defaults to `rsync` from `PATH`)
    pub fn copy_tool(mut self, tool: Box<dyn CopyTool>) -> Self {
        self.tool = Some(tool);
        self
    }

    /// Validate the settings and build the manager
    ///
    /// # Errors
    ///
    /// [`SnapkeepError::InvalidConfiguration`] if the destination is empty,
    /// no source is given, or (in snapshot mode) the prefix is unusable.
    pub fn build(self) -> Result<Snapkeep> {
        if self.destination.as_os_str().is_empty() {
            return Err(SnapkeepError::config("destination must be set"));
        }
        if self.sources.is_empty() {
            return Err(SnapkeepError::config("at least one source is required"));
        }
        if self.mode == BackupMode::Snapshot {
            config::validate_prefix(&self.prefix)?;
        }

        Ok(Snapkeep {
            destination: Destination::new(self.destination, self.prefix),
            mode: self.mode,
            options: PublishOptions {
                sources: self.sources,
                excludes: self.excludes,
                extra_flags: self.extra_flags,
                dry_run: self.dry_run,
                tolerate_vanished: self.tolerate_vanished,
            },
            policy: self.policy,
            tool: self.tool.unwrap_or_else(|| Box::new(Rsync::new())),
        })
    }
}

impl Default for SnapkeepBuilder {
    fn default() -> Self {
        Self::new()
    }
}
