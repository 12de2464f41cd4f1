//! Job-completion synchronization.
//!
//! After submission the server exposes job state only through the
//! history endpoint. This module polls it at a fixed cadence, classifies
//! each observation as pending / failed / ready, and enforces the
//! overall wait bound. Classification is a pure function so the terminal
//! states are testable without sleeping.

use std::time::{Duration, Instant};

use serde_json::Value;

use genbridge_core::outputs::{find_output, ArtifactKind, OutputDescriptor};

use crate::api::ComfyUIApi;
use crate::history::{entry_for, HistoryEntry};

// ---------------------------------------------------------------------------
// Cadence and bounds
// ---------------------------------------------------------------------------

/// Sleep between history polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Wait bound when the invocation names none.
pub const DEFAULT_MAX_WAIT_SECS: u64 = 300;

/// Floor on the wait bound.
pub const MIN_MAX_WAIT_SECS: u64 = 30;

/// Clamp a requested wait bound to the configured floor.
pub fn clamp_max_wait(requested_secs: u64) -> Duration {
    Duration::from_secs(requested_secs.max(MIN_MAX_WAIT_SECS))
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classification of a single history observation.
#[derive(Debug, Clone)]
pub enum PollDecision {
    /// The job is not finished, or its outputs are still being produced.
    Pending,
    /// The server recorded an execution error; `status` is its payload,
    /// verbatim.
    Failed { status: Value },
    /// A usable artifact descriptor was found.
    Ready {
        descriptor: OutputDescriptor,
        node_id: String,
    },
}

/// Classify one history entry.
///
/// An error status is terminal. Otherwise the entry is ready only when
/// the output locator yields a descriptor; outputs can appear
/// incrementally, so an entry without one stays pending.
pub fn classify_entry(
    entry: &HistoryEntry,
    preferred_nodes: &[String],
    kind: ArtifactKind,
) -> PollDecision {
    if entry.is_error() {
        return PollDecision::Failed {
            status: entry.status.clone(),
        };
    }
    match find_output(&entry.outputs, preferred_nodes, kind) {
        Some((descriptor, node_id)) => PollDecision::Ready {
            descriptor,
            node_id,
        },
        None => PollDecision::Pending,
    }
}

// ---------------------------------------------------------------------------
// Wait loop
// ---------------------------------------------------------------------------

/// Terminal result of waiting on a submitted job.
#[derive(Debug)]
pub enum JobOutcome {
    Succeeded {
        descriptor: OutputDescriptor,
        node_id: String,
    },
    Failed {
        status: Value,
    },
    TimedOut {
        waited: Duration,
        /// Outputs recorded at the last successful poll, for diagnosis.
        available_outputs: Option<Value>,
    },
}

/// Poll the history endpoint until the job reaches a terminal state or
/// the wait bound expires.
///
/// Transport errors and non-200 responses count as "still pending" — the
/// server drops history queries while busy. The remote job is not
/// cancelled on timeout; the id is reported for later inspection.
pub async fn wait_for_artifact(
    api: &ComfyUIApi,
    prompt_id: &str,
    preferred_nodes: &[String],
    kind: ArtifactKind,
    max_wait: Duration,
    poll_interval: Duration,
) -> JobOutcome {
    let started = Instant::now();
    let mut last_outputs: Option<Value> = None;

    loop {
        let waited = started.elapsed();
        if waited > max_wait {
            tracing::warn!(
                prompt_id,
                waited_secs = waited.as_secs(),
                "Gave up waiting for job",
            );
            return JobOutcome::TimedOut {
                waited,
                available_outputs: last_outputs,
            };
        }

        match api.get_history(prompt_id).await {
            Ok(history) => {
                if let Some(entry) = entry_for(&history, prompt_id) {
                    if !entry.outputs.is_empty() {
                        last_outputs = Some(Value::Object(entry.outputs.clone()));
                    }
                    match classify_entry(&entry, preferred_nodes, kind) {
                        PollDecision::Pending => {}
                        PollDecision::Failed { status } => {
                            tracing::error!(prompt_id, "ComfyUI execution error");
                            return JobOutcome::Failed { status };
                        }
                        PollDecision::Ready {
                            descriptor,
                            node_id,
                        } => {
                            tracing::info!(
                                prompt_id,
                                node_id = %node_id,
                                filename = %descriptor.filename,
                                "Job produced an artifact",
                            );
                            return JobOutcome::Succeeded {
                                descriptor,
                                node_id,
                            };
                        }
                    }
                }
            }
            Err(e) => {
                // Transport hiccups and non-200s count as still pending.
                tracing::debug!(prompt_id, error = %e, "History not available yet");
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
