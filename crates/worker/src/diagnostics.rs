//! Startup diagnostics for model and staging-directory layout.
//!
//! Model weights can live under several mount points depending on how
//! the container was provisioned. The probe resolves each expected
//! relative path against the candidate roots and reports what is
//! missing, so a misprovisioned volume shows up in the logs before the
//! first job fails.

use std::fs;
use std::path::{Path, PathBuf};

/// Mount points checked for model files, in resolution order.
pub const MODEL_ROOT_CANDIDATES: &[&str] =
    &["/runpod-volume/models", "/workspace/models", "/comfyui/models"];

/// A model file resolved to a concrete location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedModel {
    pub relative_path: String,
    pub resolved_path: PathBuf,
}

/// Result of probing the expected model files.
#[derive(Debug, Default)]
pub struct ModelCheck {
    pub found: Vec<LocatedModel>,
    pub missing: Vec<String>,
}

/// Probe each expected relative path against the candidate roots. The
/// first root containing the file wins.
pub fn check_expected_models(roots: &[&Path], relative_paths: &[String]) -> ModelCheck {
    let mut check = ModelCheck::default();

    for relative in relative_paths {
        let located = roots.iter().find_map(|root| {
            let candidate = root.join(relative);
            candidate.exists().then_some(candidate)
        });
        match located {
            Some(resolved_path) => check.found.push(LocatedModel {
                relative_path: relative.clone(),
                resolved_path,
            }),
            None => check.missing.push(relative.clone()),
        }
    }

    check
}

/// Log the staging directories and model probe results at startup.
pub fn log_startup_summary(input_dir: &Path, output_dir: &Path, check: &ModelCheck) {
    for (label, dir) in [("input_dir", input_dir), ("output_dir", output_dir)] {
        match dir_entry_count(dir) {
            Some(entries) => tracing::info!(dir = %dir.display(), entries, "{label} present"),
            None => tracing::warn!(dir = %dir.display(), "{label} missing"),
        }
    }

    for model in &check.found {
        tracing::info!(
            model = %model.relative_path,
            path = %model.resolved_path.display(),
            "Expected model located",
        );
    }
    if !check.missing.is_empty() {
        tracing::warn!(missing = ?check.missing, "Expected model files not found");
    }
}

/// Number of directory entries, or `None` when the directory is missing
/// or unreadable.
fn dir_entry_count(dir: &Path) -> Option<usize> {
    fs::read_dir(dir).ok().map(|entries| entries.count())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
