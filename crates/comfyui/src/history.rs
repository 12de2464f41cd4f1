//! Typed view over the generation server's job history.
//!
//! `GET /history/{prompt_id}` returns a mapping keyed by prompt id. Each
//! entry carries an execution status and the per-node recorded outputs.
//! Parsing is tolerant: a malformed entry reads as "not visible yet" so
//! the poller treats it as still pending.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Status string the server reports for a failed execution.
pub const STATUS_ERROR: &str = "error";

/// One job's recorded history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Raw status payload, surfaced verbatim on execution errors.
    #[serde(default)]
    pub status: Value,

    /// Recorded outputs keyed by node id.
    #[serde(default)]
    pub outputs: Map<String, Value>,
}

impl HistoryEntry {
    /// The `status.status_str` field, when present.
    pub fn status_str(&self) -> Option<&str> {
        self.status.get("status_str").and_then(Value::as_str)
    }

    /// Whether the server recorded an execution error for this job.
    pub fn is_error(&self) -> bool {
        self.status_str()
            .is_some_and(|s| s.eq_ignore_ascii_case(STATUS_ERROR))
    }
}

/// Extract the entry for `prompt_id` from a raw `/history` response body.
///
/// Returns `None` when the id is not present yet or the entry does not
/// parse; both mean "keep polling".
pub fn entry_for(history: &Value, prompt_id: &str) -> Option<HistoryEntry> {
    history
        .get(prompt_id)
        .and_then(|entry| serde_json::from_value(entry.clone()).ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
