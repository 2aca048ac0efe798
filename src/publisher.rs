//! Snapshot publishing
//!
//! A new snapshot is built in the reserved staging directory and promoted to
//! its final name with a single `rename`, so readers of the destination root
//! only ever see complete snapshots. A staging directory left behind by a
//! crashed or failed run is discarded at the start of the next publish.
//!
//! ## Protocol
//!
//! 1. Pick the newest existing snapshot as the hard-link reference.
//! 2. Remove any stale staging directory and create a fresh one.
//! 3. Run the copy tool into staging, logging to `rsync.log` inside it.
//! 4. Classify the exit status, applying the vanished-files tolerance.
//! 5. Stamp staging with the snapshot time; the copy tool may have given it
//!    the source root's mtime.
//! 6. Rename staging to `<prefix>_<timestamp>`.
//!
//! A hard failure at step 3 or 4 leaves staging in place for inspection. In
//! dry-run mode steps 2, 5 and 6 are only reported and the copy tool runs with
//! its own dry-run flag, streaming output to the terminal.

use crate::error::{Result, SnapkeepError};
use crate::layout::{Destination, TRANSFER_LOG};
use crate::transfer::{CopyTool, TransferOutput, TransferRequest, TransferVerdict};
use crate::types::PublishResult;
use chrono::{DateTime, Local};
use filetime::FileTime;
use std::fs;
use std::io::ErrorKind;
use std::time::Instant;
use tracing::{info, warn};

/// What to copy and how to treat the outcome
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Source paths handed to the copy tool
    pub sources: Vec<String>,
    /// Exclude patterns
    pub excludes: Vec<String>,
    /// Extra flags passed through to the copy tool
    pub extra_flags: String,
    /// Report instead of mutate
    pub dry_run: bool,
    /// Accept the "source files vanished" exit status as success
    pub tolerate_vanished: bool,
}

/// Creates snapshots in one destination
pub struct SnapshotPublisher<'a> {
    destination: &'a Destination,
    tool: &'a dyn CopyTool,
    options: &'a PublishOptions,
}

impl<'a> SnapshotPublisher<'a> {
    /// Create a publisher writing into `destination` with `tool`
    pub fn new(destination: &'a Destination, tool: &'a dyn CopyTool, options: &'a PublishOptions) -> Self {
        Self {
            destination,
            tool,
            options,
        }
    }

    /// Publish a snapshot named after `now`
    ///
    /// # Errors
    ///
    /// - [`SnapkeepError::Listing`] if the existing snapshots cannot be read
    /// - [`SnapkeepError::Staging`] if staging cannot be cleared, created or
    ///   stamped with the snapshot time
    /// - [`SnapkeepError::Spawn`] / [`SnapkeepError::TransferFailed`] if the
    ///   copy tool fails; staging is kept
    /// - [`SnapkeepError::Rename`] if the final rename fails; staging is kept
    pub fn publish(&self, now: DateTime<Local>) -> Result<PublishResult> {
        let start = Instant::now();
        let dry_run = self.options.dry_run;
        let name = self.destination.snapshot_name(&now);
        let final_path = self.destination.snapshot_path(&name);
        let staging = self.destination.staging_path();

        info!(
            "Snapshot: {:?} to {}",
            self.options.sources,
            self.destination.root().display()
        );

        let reference = self.destination.latest_snapshot()?;
        match &reference {
            Some(snapshot) => info!("Linking unchanged files against {}", snapshot.name),
            None => info!("No previous snapshot, performing a full copy"),
        }

        if dry_run {
            info!("[Dry Run] Would remove temporary directory if it exists: {}", staging.display());
            info!("[Dry Run] Would create temporary directory: {}", staging.display());
        } else {
            self.prepare_staging()?;
        }

        let request = TransferRequest {
            sources: self.options.sources.clone(),
            destination: staging.clone(),
            link_dest: reference.as_ref().map(|s| s.path.clone()),
            excludes: self.options.excludes.clone(),
            extra_flags: self.options.extra_flags.clone(),
            dry_run,
        };
        let output = if dry_run {
            TransferOutput::Inherit
        } else {
            TransferOutput::LogFile(staging.join(TRANSFER_LOG))
        };

        let status = self.tool.run(&request, &output)?;
        let verdict = status.evaluate(self.options.tolerate_vanished).inspect_err(|e| {
            warn!("{} failed ({}), leaving {} in place", self.tool.name(), e, staging.display());
        })?;

        let mut warnings = Vec::new();
        if verdict == TransferVerdict::VanishedTolerated {
            let message = "Some source files vanished during the transfer".to_string();
            warn!("{}; continuing because vanished files are tolerated", message);
            warnings.push(message);
        }

        if dry_run {
            info!("[Dry Run] Would rename {} to {}", staging.display(), final_path.display());
        } else {
            let stamp = FileTime::from_system_time(now.into());
            filetime::set_file_mtime(&staging, stamp).map_err(|source| SnapkeepError::Staging {
                path: staging.clone(),
                source,
            })?;
            info!("Renaming temporary directory {} to {}", staging.display(), final_path.display());
            fs::rename(&staging, &final_path).map_err(|source| SnapkeepError::Rename {
                from: staging.clone(),
                to: final_path.clone(),
                source,
            })?;
        }

        info!("Backup finished successfully");
        Ok(PublishResult {
            snapshot_name: name,
            path: final_path,
            reference: reference.map(|s| s.name),
            verdict,
            dry_run,
            duration_ms: start.elapsed().as_millis() as u64,
            warnings,
        })
    }

    /// Mirror the sources straight into the destination root
    ///
    /// Used by simple mode: no reference snapshot, no staging, no rename.
    pub fn mirror(&self) -> Result<PublishResult> {
        let start = Instant::now();
        let root = self.destination.root().to_path_buf();
        info!("Mirror: {:?} to {}", self.options.sources, root.display());

        let request = TransferRequest {
            sources: self.options.sources.clone(),
            destination: root.clone(),
            link_dest: None,
            excludes: self.options.excludes.clone(),
            extra_flags: self.options.extra_flags.clone(),
            dry_run: self.options.dry_run,
        };

        let status = self.tool.run(&request, &TransferOutput::Inherit)?;
        let verdict = status.evaluate(self.options.tolerate_vanished)?;

        let mut warnings = Vec::new();
        if verdict == TransferVerdict::VanishedTolerated {
            let message = "Some source files vanished during the transfer".to_string();
            warn!("{}; continuing because vanished files are tolerated", message);
            warnings.push(message);
        }

        info!("Mirror finished successfully");
        Ok(PublishResult {
            snapshot_name: String::new(),
            path: root,
            reference: None,
            verdict,
            dry_run: self.options.dry_run,
            duration_ms: start.elapsed().as_millis() as u64,
            warnings,
        })
    }

    fn prepare_staging(&self) -> Result<()> {
        let staging = self.destination.staging_path();
        let staging_error = |source| SnapkeepError::Staging {
            path: staging.clone(),
            source,
        };

        info!("Removing temporary directory if it exists: {}", staging.display());
        match fs::remove_dir_all(&staging) {
            Ok(()) => warn!("Discarded stale staging directory from an interrupted run"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(staging_error(e)),
        }

        info!("Creating temporary directory: {}", staging.display());
        fs::create_dir_all(&staging).map_err(staging_error)
    }
}
