//! Destination directory layout
//!
//! Every completed snapshot is a directory directly under the destination
//! root named `<prefix>_<YYYY-MM-DD_HH:MM:SS>`. An in-progress snapshot lives
//! in the reserved `.unfinished` directory until it is renamed into place.
//! Directories starting with `.` are never reported as snapshots.

use crate::error::{Result, SnapkeepError};
use crate::types::Snapshot;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Name of the staging directory under the destination root
pub const STAGING_DIR: &str = ".unfinished";

/// Leading character marking entries that are never snapshots
pub const RESERVED_MARKER: char = '.';

/// Name of the copy tool log written inside each snapshot
pub const TRANSFER_LOG: &str = "rsync.log";

/// Timestamp layout used in snapshot names
pub const NAME_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// A destination root and the naming rules for snapshots inside it
#[derive(Debug, Clone)]
pub struct Destination {
    root: PathBuf,
    prefix: String,
}

impl Destination {
    /// Create a layout for `root` with snapshot names starting with `prefix`
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    /// Destination root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot name prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of the staging directory
    pub fn staging_path(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Snapshot name for the wall-clock instant `now`, at second resolution
    pub fn snapshot_name<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        format!("{}_{}", self.prefix, now.format(NAME_TIME_FORMAT))
    }

    /// Snapshot name for the current local time
    pub fn snapshot_name_now(&self) -> String {
        self.snapshot_name(&Local::now())
    }

    /// Path of the snapshot directory called `name`
    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// List all snapshots, oldest first
    ///
    /// A missing root is reported as zero snapshots. Ties on the timestamp
    /// are ordered by name so the listing is stable across runs.
    ///
    /// # Errors
    ///
    /// [`SnapkeepError::Listing`] if the root exists but cannot be read.
    pub fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Destination {:?} does not exist yet", self.root);
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(SnapkeepError::Listing {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let listing_error = |source: std::io::Error| SnapkeepError::Listing {
            path: self.root.clone(),
            source,
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(listing_error)?;
            let file_type = entry.file_type().map_err(listing_error)?;
            let name = entry.file_name().to_string_lossy().into_owned();

            if !file_type.is_dir() || is_reserved(&name) {
                trace!("Skipping {:?}", name);
                continue;
            }

            let modified = entry
                .metadata()
                .and_then(|metadata| metadata.modified())
                .map_err(listing_error)?;

            snapshots.push(Snapshot::new(name, entry.path(), DateTime::<Utc>::from(modified)));
        }

        snapshots.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.name.cmp(&b.name))
        });

        debug!("Found {} snapshots in {:?}", snapshots.len(), self.root);
        Ok(snapshots)
    }

    /// The snapshot with the latest timestamp, if any
    pub fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        Ok(self.list_snapshots()?.pop())
    }
}

/// Whether `name` is reserved for in-progress or hidden entries
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_MARKER)
}
