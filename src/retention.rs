//! Calendar-tiered retention
//!
//! Decides which snapshots survive a purge pass and deletes the rest.
//!
//! ## Tiers
//!
//! Snapshots are walked newest first (by directory mtime, ties broken by
//! name) once per tier:
//!
//! - **daily**: the first `daily` snapshots are kept.
//! - **weekly**: the newest snapshot of each ISO-8601 week is that week's
//!   representative; representatives of the `weekly` most recent weeks that
//!   are not already kept are added.
//! - **monthly**: same as weekly with calendar months.
//!
//! The keep set is the union of all tiers. A week or month whose
//! representative was already kept by an earlier tier is still marked as
//! seen, but does not use up one of the tier's slots.
//!
//! Selection is a pure function of the listing and the policy
//! ([`plan_retention`]); nothing is remembered between passes, so a snapshot
//! kept today may be purged once newer snapshots push it out of every tier.
//!
//! ## Example
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use snapkeep::retention::plan_retention_in;
//! use snapkeep::{KeepPolicy, Snapshot};
//! use std::path::PathBuf;
//!
//! let now = Utc.with_ymd_and_hms(2024, 5, 29, 12, 0, 0).unwrap();
//! let snapshots: Vec<Snapshot> = [1, 2, 3]
//!     .iter()
//!     .map(|days| Snapshot::new(format!("s{}", days), PathBuf::from("/b"), now - Duration::days(*days)))
//!     .collect();
//!
//! let plan = plan_retention_in(&snapshots, &KeepPolicy::new(2, 0, 0), &Utc);
//! assert_eq!(plan.kept_names(), vec!["s1", "s2"]);
//! assert_eq!(plan.discarded_names(), vec!["s3"]);
//! ```

use crate::error::Result;
use crate::layout::Destination;
use crate::types::{KeepPolicy, KeepReason, PurgeReport, Snapshot};
use chrono::{Datelike, Local, TimeZone};
use std::collections::HashSet;
use std::fs;
use std::hash::Hash;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of retention selection for one listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Snapshots to keep, newest first, with the tier that kept them
    pub kept: Vec<(Snapshot, KeepReason)>,
    /// Snapshots to delete, newest first
    pub discarded: Vec<Snapshot>,
}

impl RetentionPlan {
    /// Names of the kept snapshots, newest first
    pub fn kept_names(&self) -> Vec<&str> {
        self.kept.iter().map(|(s, _)| s.name.as_str()).collect()
    }

    /// Names of the discarded snapshots, newest first
    pub fn discarded_names(&self) -> Vec<&str> {
        self.discarded.iter().map(|s| s.name.as_str()).collect()
    }

    /// Tier that kept `name`, or `None` if it is discarded or unknown
    pub fn reason_for(&self, name: &str) -> Option<KeepReason> {
        self.kept
            .iter()
            .find(|(s, _)| s.name == name)
            .map(|(_, reason)| *reason)
    }

    /// Total number of snapshots the plan covers
    pub fn len(&self) -> usize {
        self.kept.len() + self.discarded.len()
    }

    /// Whether the plan covers no snapshots
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plan retention with calendar buckets in the local time zone
pub fn plan_retention(snapshots: &[Snapshot], policy: &KeepPolicy) -> RetentionPlan {
    plan_retention_in(snapshots, policy, &Local)
}

/// Plan retention with calendar buckets evaluated in `tz`
///
/// The result depends only on the snapshots' names and timestamps, never on
/// their order in `snapshots`.
pub fn plan_retention_in<Tz: TimeZone>(
    snapshots: &[Snapshot],
    policy: &KeepPolicy,
    tz: &Tz,
) -> RetentionPlan {
    let mut ordered: Vec<&Snapshot> = snapshots.iter().collect();
    ordered.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.name.cmp(&a.name))
    });

    let mut reasons: Vec<Option<KeepReason>> = vec![None; ordered.len()];

    for slot in reasons.iter_mut().take(policy.daily) {
        *slot = Some(KeepReason::Daily);
    }

    keep_bucket_representatives(&ordered, &mut reasons, policy.weekly, KeepReason::Weekly, |s| {
        let week = s.timestamp.with_timezone(tz).iso_week();
        (week.year(), week.week())
    });

    keep_bucket_representatives(&ordered, &mut reasons, policy.monthly, KeepReason::Monthly, |s| {
        let local = s.timestamp.with_timezone(tz);
        (local.year(), local.month())
    });

    let mut plan = RetentionPlan::default();
    for (snapshot, reason) in ordered.into_iter().zip(reasons) {
        match reason {
            Some(reason) => plan.kept.push((snapshot.clone(), reason)),
            None => plan.discarded.push(snapshot.clone()),
        }
    }
    plan
}

/// Grant up to `limit` new keeps to the newest snapshot of each bucket
fn keep_bucket_representatives<K, F>(
    ordered: &[&Snapshot],
    reasons: &mut [Option<KeepReason>],
    limit: usize,
    reason: KeepReason,
    bucket_of: F,
) where
    K: Eq + Hash,
    F: Fn(&Snapshot) -> K,
{
    let mut seen = HashSet::new();
    let mut granted = 0;

    for (&snapshot, slot) in ordered.iter().zip(reasons.iter_mut()) {
        if granted >= limit {
            break;
        }
        if !seen.insert(bucket_of(snapshot)) {
            continue;
        }
        if slot.is_none() {
            *slot = Some(reason);
            granted += 1;
        }
    }
}

/// Applies a keep policy to the snapshots of one destination
#[derive(Debug)]
pub struct RetentionEngine<'a> {
    destination: &'a Destination,
    policy: KeepPolicy,
    dry_run: bool,
}

impl<'a> RetentionEngine<'a> {
    /// Create an engine for `destination`
    pub fn new(destination: &'a Destination, policy: KeepPolicy, dry_run: bool) -> Self {
        Self {
            destination,
            policy,
            dry_run,
        }
    }

    /// Re-read the destination and compute what a purge would do
    ///
    /// # Errors
    ///
    /// [`SnapkeepError::Listing`](crate::SnapkeepError::Listing) if the
    /// destination exists but cannot be read.
    pub fn plan(&self) -> Result<RetentionPlan> {
        let snapshots = self.destination.list_snapshots()?;
        Ok(plan_retention(&snapshots, &self.policy))
    }

    /// Re-read the destination, then delete every snapshot outside the keep set
    ///
    /// Deletion is best effort: a snapshot that cannot be removed is logged
    /// and reported in [`PurgeReport::failed`] and the pass continues.
    pub fn purge(&self) -> Result<PurgeReport> {
        let plan = self.plan()?;
        Ok(self.apply(&plan))
    }

    /// Delete (or, in dry-run mode, report) the discarded snapshots of `plan`
    pub fn apply(&self, plan: &RetentionPlan) -> PurgeReport {
        let start = Instant::now();
        let mut report = PurgeReport {
            snapshots_examined: plan.len(),
            dry_run: self.dry_run,
            ..Default::default()
        };

        info!("Found {} snapshots to consider for purging ({})", plan.len(), self.policy);
        if plan.is_empty() {
            info!("No snapshots found to purge");
            return report;
        }

        for (snapshot, reason) in &plan.kept {
            info!("Keeping snapshot {} as a {} backup", snapshot.name, reason);
            report.kept.push(snapshot.name.clone());
        }

        info!("--- Purge Summary ---");
        for snapshot in &plan.discarded {
            if self.dry_run {
                info!("[Dry Run] Would purge snapshot directory: {}", snapshot.path.display());
                report.deleted.push(snapshot.name.clone());
                continue;
            }

            info!("Purging snapshot: {}", snapshot.name);
            match fs::remove_dir_all(&snapshot.path) {
                Ok(()) => report.deleted.push(snapshot.name.clone()),
                Err(e) => {
                    warn!("Failed to purge snapshot {}: {}", snapshot.name, e);
                    report.failed.push((snapshot.name.clone(), e.to_string()));
                }
            }
        }
        info!("--- End Purge Summary ---");

        report.duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Purge kept {}, removed {}, failed {} in {}ms",
            report.kept.len(),
            report.deleted.len(),
            report.failed.len(),
            report.duration_ms
        );
        report
    }
}
