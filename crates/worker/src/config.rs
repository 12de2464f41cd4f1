//! Worker configuration loaded from environment variables.

use std::path::PathBuf;

use genbridge_core::codec::DEFAULT_MAX_INPUT_BYTES;
use genbridge_core::compress::{OutputFormat, DEFAULT_QUALITY};

/// Everything the worker reads from the environment, with defaults
/// suitable for the standard container layout. `QUEUE_URL` is read
/// separately in `main` because it has no default.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the generation server.
    pub comfyui_url: String,
    /// Target format for produced images.
    pub output_format: OutputFormat,
    /// Output quality, clamped to 1-100 at encode time.
    pub output_quality: u8,
    /// Directory staged inputs are written to.
    pub input_dir: PathBuf,
    /// Directory the server writes outputs to.
    pub output_dir: PathBuf,
    /// Files older than this are swept.
    pub cleanup_max_age_secs: u64,
    /// Minimum seconds between sweeps.
    pub cleanup_min_interval_secs: u64,
    /// Ceiling on decoded input size.
    pub input_image_max_bytes: usize,
    /// Relative model paths probed at startup (may be empty).
    pub expected_model_paths: Vec<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                                | Default                  |
    /// |----------------------------------------|--------------------------|
    /// | `COMFYUI_URL`                          | `http://127.0.0.1:8188`  |
    /// | `OUTPUT_IMAGE_FORMAT`                  | `JPEG`                   |
    /// | `OUTPUT_IMAGE_QUALITY`                 | `82`                     |
    /// | `COMFY_INPUT_DIR`                      | `/comfyui/input`         |
    /// | `COMFY_OUTPUT_DIR`                     | `/comfyui/output`        |
    /// | `OUTPUT_CLEANUP_MAX_AGE_SECONDS`       | `3600`                   |
    /// | `OUTPUT_CLEANUP_MIN_INTERVAL_SECONDS`  | `300`                    |
    /// | `INPUT_IMAGE_MAX_BYTES`                | `15728640`               |
    /// | `EXPECTED_MODEL_PATHS`                 | (empty, comma-separated) |
    ///
    /// Malformed or below-floor numeric values fall back to the default
    /// rather than failing startup.
    pub fn from_env() -> Self {
        let comfyui_url =
            std::env::var("COMFYUI_URL").unwrap_or_else(|_| "http://127.0.0.1:8188".into());

        let output_format =
            OutputFormat::from_config(&std::env::var("OUTPUT_IMAGE_FORMAT").unwrap_or_default());

        let output_quality = std::env::var("OUTPUT_IMAGE_QUALITY")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_QUALITY);

        let input_dir = PathBuf::from(non_empty_or(
            std::env::var("COMFY_INPUT_DIR").ok(),
            "/comfyui/input",
        ));
        let output_dir = PathBuf::from(non_empty_or(
            std::env::var("COMFY_OUTPUT_DIR").ok(),
            "/comfyui/output",
        ));

        let cleanup_max_age_secs = parse_bounded(
            std::env::var("OUTPUT_CLEANUP_MAX_AGE_SECONDS").ok(),
            3600,
            1,
        );
        let cleanup_min_interval_secs = parse_bounded(
            std::env::var("OUTPUT_CLEANUP_MIN_INTERVAL_SECONDS").ok(),
            300,
            1,
        );
        let input_image_max_bytes = parse_bounded(
            std::env::var("INPUT_IMAGE_MAX_BYTES").ok(),
            DEFAULT_MAX_INPUT_BYTES as u64,
            1024,
        ) as usize;

        let expected_model_paths = std::env::var("EXPECTED_MODEL_PATHS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            comfyui_url,
            output_format,
            output_quality,
            input_dir,
            output_dir,
            cleanup_max_age_secs,
            cleanup_min_interval_secs,
            input_image_max_bytes,
            expected_model_paths,
        }
    }
}

/// Parse a numeric env value, falling back to `default` when it is
/// missing, malformed, or below `min_value`.
fn parse_bounded(value: Option<String>, default: u64, min_value: u64) -> u64 {
    match value.and_then(|v| v.trim().parse::<u64>().ok()) {
        Some(parsed) if parsed >= min_value => parsed,
        _ => default,
    }
}

/// A trimmed env value, or `default` when unset or blank.
fn non_empty_or(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
