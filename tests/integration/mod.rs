//! Integration tests for snapkeep
//!
//! Drives publishing and retention against real directories. Snapshot ages
//! are simulated by setting directory mtimes, since the listing orders by
//! mtime and never parses names.

use ::snapkeep::transfer::{TransferOutput, TransferRequest};
use ::snapkeep::*;
use chrono::{DateTime, Duration, Local, TimeZone};
use filetime::FileTime;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Requests seen by a [`RecordingTool`]
pub type RequestLog = Arc<Mutex<Vec<(TransferRequest, TransferOutput)>>>;

/// Copy tool that writes one file and returns a fixed status
#[derive(Debug)]
pub struct RecordingTool {
    status: TransferStatus,
    requests: RequestLog,
}

impl RecordingTool {
    pub fn new(status: TransferStatus) -> Self {
        Self {
            status,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared view of the recorded requests, usable after the tool is boxed
    pub fn log(&self) -> RequestLog {
        Arc::clone(&self.requests)
    }
}

impl CopyTool for RecordingTool {
    fn name(&self) -> &str {
        "recording"
    }

    fn run(&self, request: &TransferRequest, output: &TransferOutput) -> Result<TransferStatus> {
        if !request.dry_run {
            fs::create_dir_all(&request.destination)?;
            fs::write(request.destination.join("payload.txt"), "payload")?;
        }
        self.requests
            .lock()
            .unwrap()
            .push((request.clone(), output.clone()));
        Ok(self.status)
    }
}

/// Copy tool that leaves the destination root with an old mtime, as
/// `rsync -a src/` does when it copies the source root's attributes
#[derive(Debug)]
pub struct BackdatingTool {
    age: Duration,
}

impl CopyTool for BackdatingTool {
    fn name(&self) -> &str {
        "backdating"
    }

    fn run(&self, request: &TransferRequest, _output: &TransferOutput) -> Result<TransferStatus> {
        fs::write(request.destination.join("payload.txt"), "payload")?;
        let old = SnapshotFixture::now() - self.age;
        filetime::set_file_mtime(&request.destination, FileTime::from_unix_time(old.timestamp(), 0))?;
        Ok(TransferStatus::Success)
    }
}

/// Destination directory pre-populated with aged snapshots
pub struct SnapshotFixture {
    pub dir: TempDir,
}

impl SnapshotFixture {
    /// Reference instant: Wednesday 2024-05-29, noon local time
    pub fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 29, 12, 0, 0).unwrap()
    }

    pub fn empty() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// One snapshot per age, named `snapshot-<days>d`
    pub fn with_ages(days: &[i64]) -> Self {
        let fixture = Self::empty();
        for d in days {
            fixture.add(&format!("snapshot-{}d", d), Self::now() - Duration::days(*d));
        }
        fixture
    }

    /// Create a snapshot directory whose mtime is `at`
    pub fn add(&self, name: &str, at: DateTime<Local>) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("data.txt"), name).unwrap();
        // Set last: writing into the directory bumps its mtime.
        filetime::set_file_mtime(&path, FileTime::from_unix_time(at.timestamp(), 0)).unwrap();
        path
    }

    pub fn destination(&self) -> Destination {
        Destination::new(self.dir.path(), "snapshot")
    }

    /// Snapshot names currently on disk, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .destination()
            .list_snapshots()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        names.sort();
        names
    }
}

fn sorted(names: &[&str]) -> Vec<String> {
    let mut names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    names.sort();
    names
}

fn publisher_for(fixture: &SnapshotFixture, tool: RecordingTool, tolerate: bool, dry_run: bool) -> Snapkeep {
    SnapkeepBuilder::new()
        .destination(fixture.dir.path())
        .sources(vec!["/srv/data".to_string()])
        .tolerate_vanished(tolerate)
        .dry_run(dry_run)
        .copy_tool(Box::new(tool))
        .build()
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_tiered_retention_on_disk() {
        let fixture = SnapshotFixture::with_ages(&[1, 2, 8, 9, 15, 16, 35, 36, 70, 71]);
        let dest = fixture.destination();

        let report = RetentionEngine::new(&dest, KeepPolicy::new(2, 2, 1), false)
            .purge()
            .unwrap();

        assert_eq!(
            report.kept,
            vec!["snapshot-1d", "snapshot-2d", "snapshot-8d", "snapshot-15d", "snapshot-35d"]
        );
        assert_eq!(report.deleted.len(), 5);
        assert!(report.is_complete());
        assert_eq!(
            fixture.names(),
            sorted(&["snapshot-1d", "snapshot-2d", "snapshot-8d", "snapshot-15d", "snapshot-35d"])
        );
    }

    #[test]
    fn test_empty_destination_purge_is_noop() {
        let fixture = SnapshotFixture::empty();
        let dest = fixture.destination();

        let report = RetentionEngine::new(&dest, KeepPolicy::new(3, 3, 3), false)
            .purge()
            .unwrap();

        assert_eq!(report.snapshots_examined, 0);
        assert!(report.kept.is_empty());
        assert!(report.deleted.is_empty());
    }

    #[test]
    fn test_zero_policy_deletes_everything() {
        let fixture = SnapshotFixture::with_ages(&[0, 1, 7, 30, 365]);
        let dest = fixture.destination();

        let report = RetentionEngine::new(&dest, KeepPolicy::default(), false)
            .purge()
            .unwrap();

        assert_eq!(report.deleted.len(), 5);
        assert!(fixture.names().is_empty());
    }

    #[test]
    fn test_purge_is_idempotent() {
        let fixture = SnapshotFixture::with_ages(&[1, 2, 8, 9, 15, 16, 35, 36, 70, 71]);
        let dest = fixture.destination();
        let engine = RetentionEngine::new(&dest, KeepPolicy::new(2, 2, 1), false);

        let first = engine.purge().unwrap();
        let second = engine.purge().unwrap();

        assert_eq!(second.kept, first.kept);
        assert!(second.deleted.is_empty());
    }

    #[test]
    fn test_dry_run_purge_keeps_directories() {
        let fixture = SnapshotFixture::with_ages(&[1, 2, 3]);
        let dest = fixture.destination();

        let report = RetentionEngine::new(&dest, KeepPolicy::new(1, 0, 0), true)
            .purge()
            .unwrap();

        assert_eq!(report.deleted, vec!["snapshot-2d", "snapshot-3d"]);
        assert_eq!(fixture.names().len(), 3);
    }

    #[test]
    fn test_tolerated_vanish_publishes() {
        let fixture = SnapshotFixture::empty();
        let snapkeep = publisher_for(&fixture, RecordingTool::new(TransferStatus::Vanished), true, false);

        let result = snapkeep.snapshot_at(SnapshotFixture::now()).unwrap();

        assert_eq!(result.verdict, TransferVerdict::VanishedTolerated);
        assert!(!result.warnings.is_empty());
        assert!(result.path.join("payload.txt").exists());
        assert!(!snapkeep.destination().staging_path().exists());
    }

    #[test]
    fn test_untolerated_vanish_fails_without_rename() {
        let fixture = SnapshotFixture::empty();
        let snapkeep = publisher_for(&fixture, RecordingTool::new(TransferStatus::Vanished), false, false);

        let err = snapkeep.snapshot_at(SnapshotFixture::now()).unwrap_err();

        assert!(matches!(err, SnapkeepError::TransferFailed { code: Some(24) }));
        assert!(snapkeep.list_snapshots().unwrap().is_empty());
        assert!(snapkeep.destination().staging_path().join("payload.txt").exists());
    }

    #[test]
    fn test_dry_run_publish_mutates_nothing() {
        let fixture = SnapshotFixture::with_ages(&[1]);
        let tool = RecordingTool::new(TransferStatus::Success);
        let log = tool.log();
        let snapkeep = publisher_for(&fixture, tool, false, true);

        let result = snapkeep.snapshot_at(SnapshotFixture::now()).unwrap();

        assert!(result.dry_run);
        assert_eq!(fixture.names(), vec!["snapshot-1d"]);
        assert!(!snapkeep.destination().staging_path().exists());

        let requests = log.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (request, output) = &requests[0];
        assert!(request.dry_run);
        assert_eq!(output, &TransferOutput::Inherit);
        assert!(Rsync::build_args(request, output).contains(&"--dry-run".to_string()));
    }

    #[test]
    fn test_reference_is_newest_by_mtime() {
        let fixture = SnapshotFixture::empty();
        fixture.add("snapshot_2099-01-01_00:00:00", SnapshotFixture::now() - Duration::days(10));
        let newest = fixture.add("snapshot_2000-01-01_00:00:00", SnapshotFixture::now() - Duration::days(1));

        let tool = RecordingTool::new(TransferStatus::Success);
        let log = tool.log();
        let snapkeep = publisher_for(&fixture, tool, false, false);
        let result = snapkeep.snapshot_at(SnapshotFixture::now()).unwrap();

        assert_eq!(result.reference.as_deref(), Some("snapshot_2000-01-01_00:00:00"));
        let requests = log.lock().unwrap();
        assert_eq!(requests[0].0.link_dest.as_ref(), Some(&newest));
        assert_eq!(
            requests[0].1,
            TransferOutput::LogFile(snapkeep.destination().staging_path().join("rsync.log"))
        );
    }

    #[test]
    fn test_run_publishes_then_purges() {
        let fixture = SnapshotFixture::with_ages(&[1, 2, 3]);
        let snapkeep = SnapkeepBuilder::new()
            .destination(fixture.dir.path())
            .sources(vec!["/srv/data".to_string()])
            .keep(KeepPolicy::new(1, 0, 0))
            .copy_tool(Box::new(RecordingTool::new(TransferStatus::Success)))
            .build()
            .unwrap();

        let summary = snapkeep.run().unwrap();

        // The fresh snapshot is the newest by mtime, so it is the one kept.
        let purge = summary.purge.unwrap();
        assert_eq!(purge.kept, vec![summary.publish.snapshot_name.clone()]);
        assert_eq!(fixture.names(), vec![summary.publish.snapshot_name]);
    }

    #[test]
    fn test_new_snapshot_dated_at_publish_time() {
        let fixture = SnapshotFixture::with_ages(&[1]);
        let snapkeep = SnapkeepBuilder::new()
            .destination(fixture.dir.path())
            .sources(vec!["/srv/data/".to_string()])
            .keep(KeepPolicy::new(1, 0, 0))
            .copy_tool(Box::new(BackdatingTool {
                age: Duration::days(30),
            }))
            .build()
            .unwrap();

        let published = snapkeep.snapshot_at(SnapshotFixture::now()).unwrap();
        let latest = snapkeep.destination().latest_snapshot().unwrap().unwrap();
        assert_eq!(latest.name, published.snapshot_name);
        assert_eq!(latest.timestamp, SnapshotFixture::now().with_timezone(&chrono::Utc));

        let report = snapkeep.purge().unwrap();
        assert_eq!(report.kept, vec![published.snapshot_name.clone()]);
        assert_eq!(report.deleted, vec!["snapshot-1d".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_real_rsync_hard_links_unchanged_files() {
        use std::os::unix::fs::MetadataExt;
        use std::process::Command;

        if Command::new("rsync").arg("--version").output().is_err() {
            eprintln!("rsync not installed, skipping");
            return;
        }

        let source = TempDir::new().unwrap();
        fs::write(source.path().join("stable.txt"), "unchanged").unwrap();
        fs::write(source.path().join("volatile.txt"), "v1").unwrap();

        let fixture = SnapshotFixture::empty();
        let snapkeep = SnapkeepBuilder::new()
            .destination(fixture.dir.path())
            .prefix("host")
            .sources(vec![format!("{}/", source.path().display())])
            .build()
            .unwrap();

        let first = snapkeep.snapshot_at(SnapshotFixture::now()).unwrap();
        fs::write(source.path().join("volatile.txt"), "v2 with more bytes").unwrap();
        let second = snapkeep
            .snapshot_at(SnapshotFixture::now() + Duration::minutes(1))
            .unwrap();

        assert_eq!(second.reference.as_deref(), Some(first.snapshot_name.as_str()));
        let inode = |p: PathBuf| fs::metadata(p).unwrap().ino();
        assert_eq!(
            inode(first.path.join("stable.txt")),
            inode(second.path.join("stable.txt"))
        );
        assert_ne!(
            inode(first.path.join("volatile.txt")),
            inode(second.path.join("volatile.txt"))
        );

        // Trailing-slash sources make the snapshot the transfer root; the
        // log must survive --delete.
        assert!(first.path.join("rsync.log").exists());
        assert!(second.path.join("rsync.log").exists());

        let snapshots = snapkeep.list_snapshots().unwrap();
        assert_eq!(snapshots[1].name, second.snapshot_name);
        assert_eq!(
            snapshots[1].timestamp,
            (SnapshotFixture::now() + Duration::minutes(1)).with_timezone(&chrono::Utc)
        );
    }
}
