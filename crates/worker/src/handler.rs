//! The per-invocation handler.
//!
//! Translates one host job into a generation-server round trip: stage
//! inline inputs, bind them into the workflow, submit, poll for the
//! produced artifact, download it, re-encode it, and shape the response.
//! Every failure converts to a structured error object at this boundary;
//! the worker process itself never dies on a bad invocation.

use std::time::Instant;

use serde_json::{json, Map, Value};

use genbridge_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use genbridge_comfyui::poll::{
    clamp_max_wait, wait_for_artifact, JobOutcome, DEFAULT_MAX_WAIT_SECS, DEFAULT_POLL_INTERVAL,
};
use genbridge_core::cleanup::StagingCleaner;
use genbridge_core::codec::encode_base64;
use genbridge_core::compress::compress_artifact;
use genbridge_core::outputs::ArtifactKind;
use genbridge_core::staging::{bind_inputs_to_graph, stage_inputs};
use genbridge_core::workflow::Workflow;

use crate::config::WorkerConfig;

/// One worker slot: the API handle, configuration, and cleanup state for
/// a sequence of invocations.
pub struct Worker {
    api: ComfyUIApi,
    config: WorkerConfig,
    cleaner: StagingCleaner,
}

/// A failure on its way to becoming the error response object.
#[derive(Debug)]
struct InvocationError {
    message: String,
    details: Map<String, Value>,
}

impl InvocationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Map::new(),
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    fn into_response(self) -> Value {
        let mut obj = Map::new();
        obj.insert("error".to_string(), Value::String(self.message));
        obj.extend(self.details);
        Value::Object(obj)
    }
}

impl Worker {
    pub fn new(api: ComfyUIApi, config: WorkerConfig) -> Self {
        let cleaner = StagingCleaner::new(
            config.input_dir.clone(),
            config.output_dir.clone(),
            std::time::Duration::from_secs(config.cleanup_max_age_secs),
            std::time::Duration::from_secs(config.cleanup_min_interval_secs),
        );
        Self {
            api,
            config,
            cleaner,
        }
    }

    /// Sweep the staging directories regardless of the throttle.
    pub fn force_cleanup(&mut self) {
        self.cleaner.run(Instant::now(), true);
    }

    /// Process one invocation. Always returns a response object: either
    /// the success shape or `{ "error": ... }` with diagnostics.
    pub async fn handle(&mut self, job_input: &Value) -> Value {
        self.cleaner.run(Instant::now(), false);

        match self.run_invocation(job_input).await {
            Ok(response) => response,
            Err(failure) => {
                tracing::error!(error = %failure.message, "Invocation failed");
                failure.into_response()
            }
        }
    }

    async fn run_invocation(&self, job_input: &Value) -> Result<Value, InvocationError> {
        // -- input validation, before any remote call --

        let workflow_value = match job_input.get("workflow") {
            Some(value) if !value.is_null() => value.clone(),
            _ => return Err(InvocationError::new("Missing workflow in job.input")),
        };
        let mut workflow = Workflow::from_value(workflow_value)
            .map_err(|e| InvocationError::new(e.to_string()))?;

        let kind = match job_input.get("output_kind").and_then(Value::as_str) {
            Some(raw) => ArtifactKind::from_input(raw)
                .map_err(|e| InvocationError::new(e.to_string()))?,
            None => ArtifactKind::Image,
        };

        let input_specs: Vec<Value> = match job_input.get("input_images") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(InvocationError::new(
                    "job.input.input_images must be an array",
                ));
            }
        };

        let staged = stage_inputs(
            &input_specs,
            &self.config.input_dir,
            self.config.input_image_max_bytes,
            chrono::Utc::now().timestamp(),
        )
        .map_err(|e| InvocationError::new(e.to_string()))?;
        bind_inputs_to_graph(&mut workflow, &staged);

        let preferred_nodes = preferred_node_ids(job_input, kind);

        let requested_wait = job_input
            .get("max_wait")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_WAIT_SECS);
        let max_wait = clamp_max_wait(requested_wait);

        // -- submission --

        let client_id = uuid::Uuid::new_v4().to_string();
        let submitted = self
            .api
            .submit_workflow(&workflow.to_value(), &client_id)
            .await
            .map_err(|e| match e {
                ComfyUIApiError::ApiError { status, body } => InvocationError::new(format!(
                    "ComfyUI /prompt failed (HTTP {status}): {body}"
                )),
                other => InvocationError::new(format!("ComfyUI /prompt failed: {other}")),
            })?;
        let prompt_id = submitted.prompt_id;
        tracing::info!(prompt_id = %prompt_id, "ComfyUI prompt submitted");

        // -- polling --

        let outcome = wait_for_artifact(
            &self.api,
            &prompt_id,
            &preferred_nodes,
            kind,
            max_wait,
            DEFAULT_POLL_INTERVAL,
        )
        .await;

        let (descriptor, node_id) = match outcome {
            JobOutcome::Succeeded {
                descriptor,
                node_id,
            } => (descriptor, node_id),
            JobOutcome::Failed { status } => {
                return Err(InvocationError::new("ComfyUI execution error")
                    .with("details", status)
                    .with("prompt_id", json!(prompt_id)));
            }
            JobOutcome::TimedOut {
                available_outputs, ..
            } => {
                let mut failure = InvocationError::new(format!(
                    "Timeout after {}s waiting for ComfyUI",
                    max_wait.as_secs()
                ))
                .with("prompt_id", json!(prompt_id));
                if let Some(outputs) = available_outputs {
                    failure = failure.with("available_outputs", outputs);
                }
                return Err(failure);
            }
        };

        // -- retrieval --

        let (bytes, content_type) =
            self.api
                .fetch_view(&descriptor, kind)
                .await
                .map_err(|e| {
                    InvocationError::new(e.to_string())
                        .with("prompt_id", json!(prompt_id))
                        .with(
                            &kind.info_field(),
                            serde_json::to_value(&descriptor).unwrap_or(Value::Null),
                        )
                })?;

        // -- re-encode (images only, best-effort) --

        let original_size = bytes.len();
        let (bytes, content_type) = if kind == ArtifactKind::Image {
            let outcome = compress_artifact(
                bytes,
                &content_type,
                self.config.output_format,
                self.config.output_quality,
            );
            if let Some(note) = &outcome.note {
                tracing::warn!(prompt_id = %prompt_id, note = %note, "Compression note");
            }
            (outcome.bytes, outcome.content_type)
        } else {
            (bytes, content_type)
        };
        tracing::info!(
            prompt_id = %prompt_id,
            original_bytes = original_size,
            final_bytes = bytes.len(),
            content_type = %content_type,
            "Artifact ready for response",
        );

        // -- response --

        let mut response = Map::new();
        response.insert("status".to_string(), json!("success"));
        response.insert("prompt_id".to_string(), json!(prompt_id));
        response.insert("node_id".to_string(), json!(node_id));
        response.insert("filename".to_string(), json!(descriptor.filename));
        response.insert("content_type".to_string(), json!(content_type));
        response.insert("file_size".to_string(), json!(bytes.len()));
        response.insert(kind.base64_field(), json!(encode_base64(&bytes)));
        if let Some(seed) = job_input.get("seed") {
            if !seed.is_null() {
                response.insert("seed".to_string(), seed.clone());
            }
        }
        Ok(Value::Object(response))
    }
}

/// The node ids searched first, from `output_node_ids` or the kind's
/// default. Entries are stringified as given; an empty or malformed list
/// falls back to the default.
fn preferred_node_ids(job_input: &Value, kind: ArtifactKind) -> Vec<String> {
    let from_input: Vec<String> = job_input
        .get("output_node_ids")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    if from_input.is_empty() {
        kind.default_node_ids()
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        from_input
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- preferred_node_ids ---------------------------------------------------

    #[test]
    fn defaults_differ_by_kind() {
        assert_eq!(
            preferred_node_ids(&json!({}), ArtifactKind::Image),
            vec!["9".to_string()]
        );
        assert_eq!(
            preferred_node_ids(&json!({}), ArtifactKind::Audio),
            vec!["8".to_string()]
        );
    }

    #[test]
    fn explicit_ids_are_stringified_as_given() {
        let input = json!({"output_node_ids": ["12", 7]});
        assert_eq!(
            preferred_node_ids(&input, ArtifactKind::Image),
            vec!["12".to_string(), "7".to_string()]
        );
    }

    #[test]
    fn empty_or_malformed_list_falls_back_to_default() {
        assert_eq!(
            preferred_node_ids(&json!({"output_node_ids": []}), ArtifactKind::Image),
            vec!["9".to_string()]
        );
        assert_eq!(
            preferred_node_ids(&json!({"output_node_ids": "9"}), ArtifactKind::Image),
            vec!["9".to_string()]
        );
        assert_eq!(
            preferred_node_ids(&json!({"output_node_ids": [null, {}]}), ArtifactKind::Image),
            vec!["9".to_string()]
        );
    }

    // -- InvocationError ------------------------------------------------------

    #[test]
    fn error_response_shape() {
        let response = InvocationError::new("boom")
            .with("prompt_id", json!("p-1"))
            .into_response();
        assert_eq!(response["error"], json!("boom"));
        assert_eq!(response["prompt_id"], json!("p-1"));
    }
}
