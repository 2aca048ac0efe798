//! # snapkeep - Hard-linked snapshots with calendar retention
//!
//! A snapshot lifecycle manager for backup destinations. Each run copies a set
//! of source trees into a new timestamped directory with rsync, hard-linking
//! files that did not change since the previous snapshot, and then prunes old
//! snapshots with a daily / weekly / monthly keep policy.
//!
//! ## Overview
//!
//! snapkeep lets you:
//! - Publish snapshots atomically: a snapshot is built in a reserved staging
//!   directory and renamed into place only after the copy succeeded
//! - Store unchanged files once across snapshots via `--link-dest`
//! - Keep the `N` most recent snapshots, plus the newest snapshot of each of
//!   the last `W` ISO weeks and `M` calendar months
//! - Preview every step with a dry run
//! - Mirror sources without snapshots in simple mode
//!
//! ## Architecture
//!
//! - **Layout** ([`layout`]): naming rules and snapshot discovery for a
//!   destination root
//! - **Transfer** ([`transfer`]): the [`CopyTool`] boundary and its rsync
//!   implementation, with exit-status classification
//! - **Publisher** ([`publisher`]): the staging-then-rename protocol
//! - **Retention** ([`retention`]): keep-set selection and best-effort purge
//! - **Driver** ([`Snapkeep`]): composes the above for one destination
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snapkeep::{Config, Snapkeep};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(Path::new("config.yaml"))?;
//! let snapkeep = Snapkeep::from_config(&config, false)?;
//!
//! let summary = snapkeep.run()?;
//! println!("Published {}", summary.publish.snapshot_name);
//! if let Some(purge) = summary.purge {
//!     println!("Removed {} old snapshots", purge.deleted.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Previewing retention
//!
//! ```rust,no_run
//! use snapkeep::{KeepPolicy, SnapkeepBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let snapkeep = SnapkeepBuilder::new()
//!     .destination("/backups/host")
//!     .prefix("host")
//!     .sources(vec!["/home".to_string()])
//!     .keep(KeepPolicy::new(7, 4, 6))
//!     .build()?;
//!
//! let plan = snapkeep.plan()?;
//! for (snapshot, reason) in &plan.kept {
//!     println!("keep {} ({})", snapshot.name, reason);
//! }
//! for snapshot in &plan.discarded {
//!     println!("drop {}", snapshot.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod layout;
pub mod publisher;
pub mod retention;
pub mod snapkeep;
pub mod transfer;
pub mod types;


pub use config::Config;
pub use error::{Result, SnapkeepError};
pub use layout::Destination;
pub use publisher::{PublishOptions, SnapshotPublisher};
pub use retention::{plan_retention, RetentionEngine, RetentionPlan};
pub use snapkeep::{Snapkeep, SnapkeepBuilder};
pub use transfer::{CopyTool, Rsync, TransferStatus, TransferVerdict};
pub use types::*;
