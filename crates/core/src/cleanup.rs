//! Age-based cleanup of the shared staging directories.
//!
//! Staged inputs and server outputs accumulate on disk because nothing
//! deletes them per invocation. The sweep removes files older than a
//! cutoff and prunes emptied subdirectories. A throttle with an injected
//! clock keeps the sweep from walking the directories on every
//! invocation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

/// Counters reported by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned_files: u64,
    pub deleted_files: u64,
    pub deleted_dirs: u64,
    pub deleted_bytes: u64,
    pub errors: u64,
}

impl SweepStats {
    fn absorb(&mut self, other: SweepStats) {
        self.scanned_files += other.scanned_files;
        self.deleted_files += other.deleted_files;
        self.deleted_dirs += other.deleted_dirs;
        self.deleted_bytes += other.deleted_bytes;
        self.errors += other.errors;
    }
}

/// Delete every file under `base_dir` whose mtime is older than `cutoff`,
/// then prune subdirectories left empty. The base directory itself is
/// never removed; a missing directory yields zero stats.
pub fn sweep_dir(base_dir: &Path, cutoff: SystemTime) -> SweepStats {
    let mut stats = SweepStats::default();
    if !base_dir.is_dir() {
        return stats;
    }
    sweep_recursive(base_dir, cutoff, false, &mut stats);
    stats
}

fn sweep_recursive(dir: &Path, cutoff: SystemTime, prune_self: bool, stats: &mut SweepStats) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            stats.errors += 1;
            tracing::warn!(dir = %dir.display(), error = %e, "Cleanup failed to read directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            sweep_recursive(&path, cutoff, true, stats);
            continue;
        }

        stats.scanned_files += 1;
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(file = %path.display(), error = %e, "Cleanup failed to stat file");
                continue;
            }
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                stats.deleted_files += 1;
                stats.deleted_bytes += metadata.len();
            }
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(file = %path.display(), error = %e, "Cleanup failed to delete file");
            }
        }
    }

    if prune_self {
        let is_empty = fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(false);
        if is_empty && fs::remove_dir(dir).is_ok() {
            stats.deleted_dirs += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

/// Minimum-interval gate for the sweep. The clock is injected so the
/// gate is testable without sleeping.
#[derive(Debug)]
pub struct CleanupThrottle {
    min_interval: Duration,
    last_run: Option<Instant>,
}

impl CleanupThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_run: None,
        }
    }

    /// Whether a sweep is due at `now`. Marks the run when it is.
    pub fn should_run(&mut self, now: Instant) -> bool {
        match self.last_run {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_run = Some(now);
                true
            }
        }
    }

    /// Record a run at `now` regardless of the interval (forced sweeps).
    pub fn mark(&mut self, now: Instant) {
        self.last_run = Some(now);
    }
}

// ---------------------------------------------------------------------------
// Staging cleaner
// ---------------------------------------------------------------------------

/// Owns the two staging directories, the age policy, and the throttle.
#[derive(Debug)]
pub struct StagingCleaner {
    input_dir: PathBuf,
    output_dir: PathBuf,
    max_age: Duration,
    throttle: CleanupThrottle,
}

impl StagingCleaner {
    pub fn new(
        input_dir: PathBuf,
        output_dir: PathBuf,
        max_age: Duration,
        min_interval: Duration,
    ) -> Self {
        Self {
            input_dir,
            output_dir,
            max_age,
            throttle: CleanupThrottle::new(min_interval),
        }
    }

    /// Sweep both directories when due (or when `force` is set) and log a
    /// report. Returns `None` when the throttle suppressed the run.
    pub fn run(&mut self, now: Instant, force: bool) -> Option<SweepStats> {
        if force {
            self.throttle.mark(now);
        } else if !self.throttle.should_run(now) {
            return None;
        }

        let cutoff = SystemTime::now()
            .checked_sub(self.max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut stats = sweep_dir(&self.output_dir, cutoff);
        stats.absorb(sweep_dir(&self.input_dir, cutoff));

        tracing::info!(
            input_dir = %self.input_dir.display(),
            output_dir = %self.output_dir.display(),
            older_than_secs = self.max_age.as_secs(),
            scanned_files = stats.scanned_files,
            deleted_files = stats.deleted_files,
            deleted_dirs = stats.deleted_dirs,
            freed = %format_bytes(stats.deleted_bytes),
            errors = stats.errors,
            "Staging cleanup completed",
        );

        Some(stats)
    }
}

/// Human-readable byte formatting for the cleanup report.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
