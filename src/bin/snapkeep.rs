//! # snapkeep CLI - Snapshot backups with tiered retention
//!
//! Command-line front end for the snapkeep library. Everything a run does is
//! described by a YAML configuration file.
//!
//! ## Usage
//! ```bash
//! # Publish a snapshot and prune old ones (the default command)
//! snapkeep --config /etc/snapkeep/host.yaml
//!
//! # See what would happen without touching the destination
//! snapkeep --dry-run run
//!
//! # Show which snapshots the keep policy would retain
//! snapkeep list --plan
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use snapkeep::{
    BackupMode, Config, KeepReason, PublishResult, PurgeReport, Result, Snapkeep, SnapkeepError,
    TransferVerdict,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// snapkeep CLI - rsync snapshots with daily/weekly/monthly retention
#[derive(Parser)]
#[command(name = "snapkeep")]
#[command(version)]
#[command(about = "Hard-linked incremental snapshots with calendar-tiered retention")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Report what would be done without changing the destination
    #[arg(long, global = true)]
    dry_run: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Show a spinner while the copy tool runs
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a snapshot, then apply the keep policy
    Run,

    /// Publish a snapshot only
    #[command(alias = "snap")]
    Snapshot,

    /// Apply the keep policy only
    #[command(alias = "gc")]
    Purge,

    /// List snapshots in the destination
    #[command(alias = "ls")]
    List {
        /// Show size on disk
        #[arg(short, long)]
        detailed: bool,

        /// Show what the keep policy would do with each snapshot
        #[arg(short, long)]
        plan: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration file and print it
    CheckConfig,
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(&config, cli.dry_run, cli.progress),
        Commands::Snapshot => cmd_snapshot(&config, cli.dry_run, cli.progress),
        Commands::Purge => cmd_purge(&config, cli.dry_run),
        Commands::List { detailed, plan, json } => cmd_list(&config, detailed, plan, json),
        Commands::CheckConfig => cmd_check_config(&cli.config, &config),
    }
}

/// Publish then purge, or mirror in simple mode
fn cmd_run(config: &Config, dry_run: bool, show_progress: bool) -> Result<()> {
    let snapkeep = Snapkeep::from_config(config, dry_run)?;
    let start = Instant::now();

    let spinner = spinner(show_progress && !dry_run, "Copying files...");
    let result = snapkeep.run();
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let summary = result?;

    match summary.mode {
        BackupMode::Simple => print_mirror(&summary.publish),
        BackupMode::Snapshot => print_publish(&summary.publish),
    }
    if let Some(purge) = &summary.purge {
        print_purge(purge);
    }

    println!(
        "\n{}",
        format!("Total time: {}", format_duration(round_ms(start.elapsed()))).dimmed()
    );
    Ok(())
}

/// Publish a snapshot without running retention
fn cmd_snapshot(config: &Config, dry_run: bool, show_progress: bool) -> Result<()> {
    let snapkeep = open_snapshot_mode(config, dry_run)?;

    let spinner = spinner(show_progress && !dry_run, "Copying files...");
    let result = snapkeep.snapshot();
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    print_publish(&result?);
    Ok(())
}

/// Run one retention pass
fn cmd_purge(config: &Config, dry_run: bool) -> Result<()> {
    let snapkeep = open_snapshot_mode(config, dry_run)?;
    let report = snapkeep.purge()?;
    print_purge(&report);
    Ok(())
}

#[derive(Serialize)]
struct ListEntry {
    name: String,
    path: PathBuf,
    timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep: Option<Option<KeepReason>>,
    #[serde(skip)]
    age: Duration,
}

/// List snapshots, optionally with sizes and the retention verdict
fn cmd_list(config: &Config, detailed: bool, with_plan: bool, json: bool) -> Result<()> {
    let snapkeep = open_snapshot_mode(config, false)?;
    let snapshots = snapkeep.list_snapshots()?;
    let plan = if with_plan { Some(snapkeep.plan()?) } else { None };

    // Newest first, like the retention walk
    let now = chrono::Utc::now();
    let entries: Vec<ListEntry> = snapshots
        .into_iter()
        .rev()
        .map(|s| ListEntry {
            age: s.age(now),
            size_bytes: detailed.then(|| dir_size(&s.path)),
            keep: plan.as_ref().map(|p| p.reason_for(&s.name)),
            name: s.name,
            path: s.path,
            timestamp: s.timestamp,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("{}", "No snapshots found.".yellow());
        return Ok(());
    }

    println!(
        "{} {}",
        "Snapshots in".blue().bold(),
        snapkeep.destination().root().display().to_string().cyan()
    );
    println!();

    for entry in &entries {
        print!("  {} ", entry.name.yellow().bold());
        print!(
            "{} ",
            format!("({} ago)", format_duration(Duration::from_secs(entry.age.as_secs()))).dimmed()
        );

        match entry.keep {
            Some(Some(reason)) => print!("{}", format!("keep: {}", reason).green()),
            Some(None) => print!("{}", "purge".red()),
            None => {}
        }
        println!();

        if let Some(size) = entry.size_bytes {
            println!("      Size: {}", format_bytes(size).dimmed());
        }
    }

    if let Some(plan) = &plan {
        println!(
            "\n{}",
            format!(
                "{} kept, {} would be purged ({})",
                plan.kept.len(),
                plan.discarded.len(),
                snapkeep.policy()
            )
            .dimmed()
        );
    }
    Ok(())
}

/// Print the effective configuration
fn cmd_check_config(path: &Path, config: &Config) -> Result<()> {
    let snapkeep = Snapkeep::from_config(config, false)?;

    println!("{} {}", "✓".green().bold(), format!("{} is valid", path.display()).bold());
    println!("  Mode: {}", format!("{:?}", config.mode).to_lowercase().cyan());
    println!("  Destination: {}", config.destination.cyan());
    for source in &config.source {
        println!("  Source: {}", source.cyan());
    }
    for pattern in &config.exclude {
        println!("  Exclude: {}", pattern.dimmed());
    }

    if config.mode == BackupMode::Snapshot {
        println!("  Prefix: {}", config.snapshot_prefix.cyan());
        println!("  Keep: {}", snapkeep.policy().to_string().cyan());
        println!(
            "  Next snapshot: {}",
            snapkeep.destination().snapshot_name_now().yellow()
        );
    }

    println!("  rsync: {}", config.rsync_binary.cyan());
    if !config.rsync_extra_flags.trim().is_empty() {
        println!("  Extra flags: {}", config.rsync_extra_flags.cyan());
    }
    if config.ignore_vanished_files_error {
        println!("  Vanished source files: {}", "tolerated".yellow());
    }
    Ok(())
}

fn open_snapshot_mode(config: &Config, dry_run: bool) -> Result<Snapkeep> {
    if config.mode != BackupMode::Snapshot {
        return Err(SnapkeepError::config(
            "this command needs 'mode: snapshot'; simple mode only supports 'run'",
        ));
    }
    Snapkeep::from_config(config, dry_run)
}

fn spinner(enabled: bool, message: &'static str) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

fn print_publish(result: &PublishResult) {
    if result.dry_run {
        println!(
            "{} Would publish {}",
            "○".yellow().bold(),
            result.snapshot_name.yellow().bold()
        );
    } else {
        println!(
            "{} Published snapshot {}",
            "✓".green().bold(),
            result.snapshot_name.yellow().bold()
        );
        println!("  Path: {}", result.path.display().to_string().cyan());
    }

    match &result.reference {
        Some(reference) => println!("  Linked against: {}", reference.cyan()),
        None => println!("  Linked against: {}", "nothing (full copy)".dimmed()),
    }
    if result.verdict == TransferVerdict::VanishedTolerated {
        println!("  {}", "Some source files vanished during the copy".yellow());
    }
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );
}

fn print_mirror(result: &PublishResult) {
    let verb = if result.dry_run { "Would mirror" } else { "Mirrored" };
    println!(
        "{} {} into {}",
        "✓".green().bold(),
        verb,
        result.path.display().to_string().cyan()
    );
    if result.verdict == TransferVerdict::VanishedTolerated {
        println!("  {}", "Some source files vanished during the copy".yellow());
    }
}

fn print_purge(report: &PurgeReport) {
    let title = if report.dry_run {
        "Retention (dry run)"
    } else {
        "Retention"
    };
    println!("\n{}", title.bold());
    println!("  Snapshots examined: {}", report.snapshots_examined);
    println!("  Kept: {}", report.kept.len().to_string().green());

    let removed = if report.dry_run { "Would purge" } else { "Purged" };
    println!("  {}: {}", removed, report.deleted.len().to_string().yellow());
    for name in &report.deleted {
        println!("    - {}", name.dimmed());
    }

    if !report.is_complete() {
        println!("  {}: {}", "Failed".red(), report.failed.len());
        for (name, error) in &report.failed {
            println!("    - {}: {}", name, error.red());
        }
    }
}

/// Apparent size of the regular files below `path`
fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

fn round_ms(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

/// Format bytes in human-readable form
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
