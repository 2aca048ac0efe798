//! Main test module for snapkeep
//!
//! This module includes all test suites:
//! - Integration tests for the publish and purge scenarios
//! - Chaos tests for interrupted and failing runs
//! - Property-based tests for retention invariants

pub mod integration;

#[cfg(test)]
mod edge_cases {
    use ::snapkeep::*;
    use chrono::{Local, TimeZone};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_destination_is_created_on_publish() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested").join("backups");
        let tool = crate::integration::RecordingTool::new(TransferStatus::Success);

        let snapkeep = SnapkeepBuilder::new()
            .destination(&root)
            .sources(vec!["/data".to_string()])
            .copy_tool(Box::new(tool))
            .build()
            .unwrap();

        assert!(snapkeep.list_snapshots().unwrap().is_empty());
        let now = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let result = snapkeep.snapshot_at(now).unwrap();
        assert_eq!(result.path, root.join("snapshot_2024-01-02_03:04:05"));
        assert!(result.path.is_dir());
    }

    #[test]
    fn test_hidden_entries_survive_purge() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".unfinished")).unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();
        fs::create_dir(temp.path().join("snapshot_2024-01-01_00:00:00")).unwrap();
        fs::write(temp.path().join("README"), "notes").unwrap();

        let dest = Destination::new(temp.path(), "snapshot");
        let report = RetentionEngine::new(&dest, KeepPolicy::default(), false)
            .purge()
            .unwrap();

        assert_eq!(report.deleted, vec!["snapshot_2024-01-01_00:00:00"]);
        assert!(temp.path().join(".unfinished").exists());
        assert!(temp.path().join(".git").exists());
        assert!(temp.path().join("README").exists());
    }

    #[test]
    fn test_foreign_directories_count_as_snapshots() {
        // Names are never parsed: any visible directory takes part in retention.
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("manual-copy")).unwrap();

        let dest = Destination::new(temp.path(), "host");
        let snapshots = dest.list_snapshots().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "manual-copy");
    }

    #[test]
    fn test_prefix_with_spaces_and_unicode() {
        let dest = Destination::new("/b", "mon serveur ✓");
        let now = Local.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
        assert_eq!(dest.snapshot_name(&now), "mon serveur ✓_2024-02-29_23:59:59");
    }

    #[test]
    fn test_policy_larger_than_history_keeps_everything() {
        let fixture = crate::integration::SnapshotFixture::with_ages(&[0, 3, 40, 400]);
        let dest = fixture.destination();
        let report = RetentionEngine::new(&dest, KeepPolicy::new(10, 10, 10), false)
            .purge()
            .unwrap();
        assert_eq!(report.kept.len(), 4);
        assert!(report.deleted.is_empty());
    }
}
