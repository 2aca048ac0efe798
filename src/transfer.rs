//! Copy-and-link tool boundary
//!
//! The byte-level work of a snapshot is delegated to an external tool
//! (`rsync` by default). This module describes one transfer as a
//! [`TransferRequest`], runs it through the [`CopyTool`] trait, and reduces
//! the process exit status to a tagged [`TransferStatus`]:
//!
//! | exit status | status |
//! |---|---|
//! | `0` | [`TransferStatus::Success`] |
//! | `24` | [`TransferStatus::Vanished`] (source entries disappeared mid-transfer) |
//! | anything else, or a signal | [`TransferStatus::Failed`] |
//!
//! Whether a vanish is acceptable is decided in one place,
//! [`TransferStatus::evaluate`].
//!
//! ## Example
//!
//! ```rust
//! use snapkeep::transfer::{Rsync, TransferOutput, TransferRequest};
//! use std::path::PathBuf;
//!
//! let request = TransferRequest {
//!     sources: vec!["/home".to_string()],
//!     destination: PathBuf::from("/backups/.unfinished"),
//!     link_dest: Some(PathBuf::from("/backups/host_2024-05-01_03:00:00")),
//!     excludes: vec!["*.cache".to_string()],
//!     extra_flags: String::new(),
//!     dry_run: false,
//! };
//! let args = Rsync::build_args(&request, &TransferOutput::Inherit);
//! assert_eq!(args.last().map(String::as_str), Some("/backups/.unfinished"));
//! ```

use crate::error::{Result, SnapkeepError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use tracing::{debug, info, warn};

/// Exit status rsync uses for "some files vanished before they could be transferred"
pub const VANISHED_EXIT_CODE: i32 = 24;

/// Flags passed to rsync on every run
pub const BASE_RSYNC_ARGS: &[&str] = &["-a", "-v", "-h", "--delete", "--stats", "--inplace"];

/// Everything the copy tool needs to populate one destination
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferRequest {
    /// Source paths, passed verbatim (a trailing `/` keeps its rsync meaning)
    pub sources: Vec<String>,
    /// Directory to populate
    pub destination: PathBuf,
    /// Reference directory whose unchanged files are hard-linked
    pub link_dest: Option<PathBuf>,
    /// Exclude patterns
    pub excludes: Vec<String>,
    /// Free-form extra flags, split on whitespace
    pub extra_flags: String,
    /// Ask the tool to only report what it would do
    pub dry_run: bool,
}

/// Where the tool's standard streams go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutput {
    /// Stream straight to the caller's stdout and stderr
    Inherit,
    /// Capture stdout and stderr in a log file; stderr is echoed as well
    LogFile(PathBuf),
}

/// Tagged outcome of one tool run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Exit status 0
    Success,
    /// Exit status 24, some source entries vanished
    Vanished,
    /// Any other exit status; `None` when killed by a signal
    Failed(Option<i32>),
}

/// Accepted outcome of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferVerdict {
    /// The tool reported full success
    Clean,
    /// Sources vanished and the run was configured to accept that
    VanishedTolerated,
}

impl TransferStatus {
    /// Classify a raw exit code
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => TransferStatus::Success,
            Some(VANISHED_EXIT_CODE) => TransferStatus::Vanished,
            other => TransferStatus::Failed(other),
        }
    }

    /// Classify a process exit status
    pub fn from_exit_status(status: ExitStatus) -> Self {
        Self::from_code(status.code())
    }

    /// Apply the vanished-files tolerance policy
    ///
    /// # Errors
    ///
    /// [`SnapkeepError::TransferFailed`] for any failure, and for
    /// [`TransferStatus::Vanished`] when `tolerate_vanished` is off.
    pub fn evaluate(self, tolerate_vanished: bool) -> Result<TransferVerdict> {
        match self {
            TransferStatus::Success => Ok(TransferVerdict::Clean),
            TransferStatus::Vanished if tolerate_vanished => Ok(TransferVerdict::VanishedTolerated),
            TransferStatus::Vanished => Err(SnapkeepError::TransferFailed {
                code: Some(VANISHED_EXIT_CODE),
            }),
            TransferStatus::Failed(code) => Err(SnapkeepError::TransferFailed { code }),
        }
    }
}

/// An external tool able to copy sources into a destination
///
/// Implementations block until the transfer finishes.
pub trait CopyTool: Send + Sync + std::fmt::Debug {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Run one transfer
    ///
    /// # Errors
    ///
    /// Only for failures to run the tool at all (spawn, log file); a tool
    /// that ran and failed is reported through [`TransferStatus`].
    fn run(&self, request: &TransferRequest, output: &TransferOutput) -> Result<TransferStatus>;
}

/// rsync as the copy-and-link tool
#[derive(Debug, Clone)]
pub struct Rsync {
    binary: String,
}

impl Rsync {
    /// Use `rsync` from `PATH`
    pub fn new() -> Self {
        Self::with_binary("rsync")
    }

    /// Use a specific rsync executable
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Build the rsync argument list for `request`
    ///
    /// A log file written into the destination root is protected from
    /// `--delete`, which would otherwise unlink it as extraneous when a
    /// source ends in `/`.
    pub fn build_args(request: &TransferRequest, output: &TransferOutput) -> Vec<String> {
        let mut args: Vec<String> = BASE_RSYNC_ARGS.iter().map(|s| s.to_string()).collect();

        if let TransferOutput::LogFile(log) = output {
            if log.parent() == Some(request.destination.as_path()) {
                if let Some(name) = log.file_name() {
                    args.push(format!("--filter=P /{}", name.to_string_lossy()));
                }
            }
        }

        if let Some(reference) = &request.link_dest {
            args.push(format!("--link-dest={}", reference.display()));
        }
        for pattern in &request.excludes {
            args.push(format!("--exclude={}", pattern));
        }
        args.extend(request.extra_flags.split_whitespace().map(str::to_string));

        if request.dry_run && !args.iter().any(|a| a == "--dry-run" || a == "-n") {
            args.push("--dry-run".to_string());
        }

        args.extend(request.sources.iter().cloned());
        args.push(request.destination.display().to_string());
        args
    }

    fn spawn_error(&self, source: io::Error) -> SnapkeepError {
        SnapkeepError::Spawn {
            program: self.binary.clone(),
            source,
        }
    }
}

impl Default for Rsync {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyTool for Rsync {
    fn name(&self) -> &str {
        &self.binary
    }

    fn run(&self, request: &TransferRequest, output: &TransferOutput) -> Result<TransferStatus> {
        let args = Self::build_args(request, output);
        info!("Running command: {} {}", self.binary, args.join(" "));

        let mut command = Command::new(&self.binary);
        command.args(&args).stdin(Stdio::null());

        let status = match output {
            TransferOutput::Inherit => command
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .map_err(|e| self.spawn_error(e))?,
            TransferOutput::LogFile(path) => {
                let log = File::create(path)?;
                debug!("Capturing {} output in {:?}", self.binary, path);

                let mut child = command
                    .stdout(Stdio::from(log.try_clone()?))
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| self.spawn_error(e))?;

                let stderr = child
                    .stderr
                    .take()
                    .ok_or_else(|| SnapkeepError::internal("child stderr was not captured"))?;
                let relay = thread::spawn(move || tee(stderr, log));

                let status = child.wait()?;
                match relay.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Failed to relay {} stderr: {}", self.binary, e),
                    Err(_) => warn!("stderr relay thread for {} panicked", self.binary),
                }
                status
            }
        };

        let result = TransferStatus::from_exit_status(status);
        debug!("{} finished with {:?}", self.binary, result);
        Ok(result)
    }
}

/// Copy `input` into `log` and the process's stderr until EOF
fn tee(mut input: impl Read, mut log: File) -> io::Result<()> {
    let mut buffer = [0u8; 8192];
    let stderr = io::stderr();
    loop {
        let read = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        log.write_all(&buffer[..read])?;
        // The log is authoritative; a closed terminal must not abort the copy.
        let _ = stderr.lock().write_all(&buffer[..read]);
    }
    log.flush()
}
