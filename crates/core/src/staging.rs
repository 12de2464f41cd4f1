//! Input staging: decode inline payloads, write them to the shared input
//! directory, and bind the resulting filenames into the workflow.
//!
//! Staged files are written once and never mutated; the cleanup sweep is
//! the only thing that deletes them. The input directory is shared across
//! invocations, not namespaced per job.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::codec::{decode_data_uri, extension_for_content_type};
use crate::error::CoreError;
use crate::workflow::{Workflow, DEFAULT_IMAGE_FIELD, LOAD_IMAGE_CLASS};

/// Sanitized filenames are truncated to this length.
pub const MAX_FILENAME_LEN: usize = 180;

// ---------------------------------------------------------------------------
// Filename sanitization
// ---------------------------------------------------------------------------

/// Reduce a caller-supplied filename to a safe basename.
///
/// Strips directory components, replaces anything outside
/// `[A-Za-z0-9._-]` with `_`, strips leading dots, and truncates to
/// [`MAX_FILENAME_LEN`]. Falls back to `default_name` when nothing
/// usable remains.
pub fn sanitize_filename(name: &str, default_name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return default_name.to_string();
    }

    let base = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = safe.trim_start_matches('.');
    if safe.is_empty() {
        return default_name.to_string();
    }
    safe.chars().take(MAX_FILENAME_LEN).collect()
}

// ---------------------------------------------------------------------------
// Input specs
// ---------------------------------------------------------------------------

/// One entry of the invocation's `input_images` list.
#[derive(Debug, Clone)]
pub struct InputSpec {
    pub data_uri: String,
    pub filename: Option<String>,
    pub target_node_id: Option<String>,
    pub target_field: String,
}

/// Keys accepted for the inline payload, in priority order.
const DATA_URI_KEYS: &[&str] = &["data_uri", "image_data_uri", "imageDataUri", "image"];

impl InputSpec {
    /// Parse one raw spec object. `index` is only used in error messages.
    pub fn from_value(value: &Value, index: usize) -> Result<Self, CoreError> {
        let obj = value.as_object().ok_or_else(|| {
            CoreError::Validation(format!("input_images[{index}] must be an object"))
        })?;

        let data_uri = DATA_URI_KEYS
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        let filename = obj
            .get("filename")
            .and_then(Value::as_str)
            .map(str::to_string);

        let target_node_id = obj.get("node_id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        let target_field = obj
            .get("node_field")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_IMAGE_FIELD)
            .to_string();

        Ok(Self {
            data_uri,
            filename,
            target_node_id,
            target_field,
        })
    }
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// A decoded input written to the staging directory.
#[derive(Debug, Clone)]
pub struct StagedInput {
    pub filename: String,
    pub path: PathBuf,
    pub byte_length: usize,
    pub content_type: String,
    pub target_node_id: Option<String>,
    pub target_field: String,
}

/// Decode and write every input spec to `input_dir`.
///
/// The first failure aborts the whole batch; files already written stay
/// on disk for the cleanup sweep. `now_unix` seeds generated default
/// filenames.
pub fn stage_inputs(
    specs: &[Value],
    input_dir: &Path,
    max_bytes: usize,
    now_unix: i64,
) -> Result<Vec<StagedInput>, CoreError> {
    if specs.is_empty() {
        return Ok(Vec::new());
    }

    fs::create_dir_all(input_dir).map_err(|e| {
        CoreError::Staging(format!(
            "Failed to create input dir '{}': {e}",
            input_dir.display()
        ))
    })?;

    let mut staged = Vec::with_capacity(specs.len());
    for (index, item) in specs.iter().enumerate() {
        let spec = InputSpec::from_value(item, index)?;

        let payload = decode_data_uri(&spec.data_uri, max_bytes).map_err(|e| match e {
            CoreError::Validation(msg) => {
                CoreError::Validation(format!("input_images[{index}] {msg}"))
            }
            other => other,
        })?;

        let extension = extension_for_content_type(&payload.content_type);
        let default_name = format!("job-input-{now_unix}-{index}.{extension}");
        let mut filename = sanitize_filename(spec.filename.as_deref().unwrap_or(""), &default_name);
        if !filename.contains('.') {
            filename = format!("{filename}.{extension}");
        }

        let path = input_dir.join(&filename);
        fs::write(&path, &payload.bytes).map_err(|e| {
            CoreError::Staging(format!("Failed writing input image '{filename}': {e}"))
        })?;

        tracing::info!(
            filename = %filename,
            bytes = payload.bytes.len(),
            content_type = %payload.content_type,
            "Staged input image",
        );

        staged.push(StagedInput {
            filename,
            path,
            byte_length: payload.bytes.len(),
            content_type: payload.content_type,
            target_node_id: spec.target_node_id,
            target_field: spec.target_field,
        });
    }

    Ok(staged)
}

// ---------------------------------------------------------------------------
// Graph binding
// ---------------------------------------------------------------------------

/// Bind each staged filename into the workflow.
///
/// An explicit `node_id` on the spec is tried first. When it is absent or
/// does not resolve, the first `LoadImage` node in document order gets
/// its `image` input set instead. At most one binding per staged input;
/// first match wins.
pub fn bind_inputs_to_graph(workflow: &mut Workflow, staged: &[StagedInput]) {
    for input in staged {
        if let Some(node_id) = &input.target_node_id {
            if workflow.set_node_input(
                node_id,
                &input.target_field,
                Value::String(input.filename.clone()),
            ) {
                tracing::info!(
                    node = %node_id,
                    field = %input.target_field,
                    file = %input.filename,
                    "Bound input image to workflow node",
                );
                continue;
            }
        }

        if let Some(node_id) = workflow.first_node_of_class(LOAD_IMAGE_CLASS) {
            let node_id = node_id.to_string();
            workflow.set_node_input(
                &node_id,
                DEFAULT_IMAGE_FIELD,
                Value::String(input.filename.clone()),
            );
            tracing::info!(
                node = %node_id,
                file = %input.filename,
                "Bound input image to first LoadImage node",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
