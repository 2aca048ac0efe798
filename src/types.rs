//! Core data types used throughout snapkeep
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Destination state**: `Snapshot` - one completed snapshot directory
//! - **Policy**: `KeepPolicy`, `KeepReason`, `BackupMode` - what a run should do
//! - **Results**: `PublishResult`, `PurgeReport`, `RunSummary` - what a run did
//!
//! ## Examples
//!
//! ```rust
//! use snapkeep::types::KeepPolicy;
//!
//! let policy = KeepPolicy::new(7, 4, 6);
//! assert_eq!(policy.max_kept(), 17);
//! assert!(!policy.is_empty());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::transfer::TransferVerdict;

/// A completed snapshot directory directly under the destination root
///
/// The timestamp is the directory's modification time and is the only
/// source of truth for ordering; the name is never parsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    /// Directory name
    pub name: String,
    /// Absolute path of the directory
    pub path: PathBuf,
    /// Last-modified time of the directory
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot record
    pub fn new(name: impl Into<String>, path: PathBuf, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            path,
            timestamp,
        }
    }

    /// Age of the snapshot relative to `now`, clamped at zero
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.timestamp).to_std().unwrap_or_default()
    }
}

/// Number of calendar buckets to retain per tier
///
/// Each count means "keep this many most-recent distinct buckets of that
/// granularity". All-zero keeps nothing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KeepPolicy {
    /// Most recent snapshots to keep unconditionally
    #[serde(default)]
    pub daily: usize,
    /// ISO weeks to keep one snapshot from
    #[serde(default)]
    pub weekly: usize,
    /// Calendar months to keep one snapshot from
    #[serde(default)]
    pub monthly: usize,
}

impl KeepPolicy {
    /// Create a policy from the three tier counts
    pub fn new(daily: usize, weekly: usize, monthly: usize) -> Self {
        Self {
            daily,
            weekly,
            monthly,
        }
    }

    /// Whether every tier is zero, meaning every snapshot is purged
    pub fn is_empty(&self) -> bool {
        self.daily == 0 && self.weekly == 0 && self.monthly == 0
    }

    /// Upper bound on the size of the keep set
    pub fn max_kept(&self) -> usize {
        self.daily + self.weekly + self.monthly
    }
}

impl fmt::Display for KeepPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "daily={} weekly={} monthly={}",
            self.daily, self.weekly, self.monthly
        )
    }
}

/// Tier that first granted a snapshot membership in the keep set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum KeepReason {
    /// Among the most recent `daily` snapshots
    Daily,
    /// Newest snapshot of one of the `weekly` most recent ISO weeks
    Weekly,
    /// Newest snapshot of one of the `monthly` most recent months
    Monthly,
}

impl fmt::Display for KeepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeepReason::Daily => "daily",
            KeepReason::Weekly => "weekly",
            KeepReason::Monthly => "monthly",
        };
        f.write_str(name)
    }
}

/// How a run lays out the destination
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// Timestamped hard-linked snapshots plus retention
    #[default]
    Snapshot,
    /// Plain mirror of the sources into the destination root
    Simple,
}

/// Result of publishing one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResult {
    /// Final snapshot name (`<prefix>_<timestamp>`)
    pub snapshot_name: String,
    /// Final snapshot path
    pub path: PathBuf,
    /// Snapshot used as the hard-link reference, if any
    pub reference: Option<String>,
    /// How the copy tool finished
    pub verdict: TransferVerdict,
    /// Whether this was a dry run (nothing was written)
    pub dry_run: bool,
    /// Time taken in milliseconds
    pub duration_ms: u64,
    /// Non-fatal conditions surfaced during the publish
    pub warnings: Vec<String>,
}

/// Result of one retention pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeReport {
    /// Number of snapshots found in the destination
    pub snapshots_examined: usize,
    /// Names kept, newest first
    pub kept: Vec<String>,
    /// Names deleted (or that would be deleted in a dry run)
    pub deleted: Vec<String>,
    /// Names whose deletion failed, with the error text
    pub failed: Vec<(String, String)>,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

impl PurgeReport {
    /// Whether every deletion candidate was handled
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of a full invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Mode the run executed in
    pub mode: BackupMode,
    /// Publish outcome (snapshot mode) or mirror outcome (simple mode)
    pub publish: PublishResult,
    /// Retention outcome, absent in simple mode
    pub purge: Option<PurgeReport>,
}
