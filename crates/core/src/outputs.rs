//! Locating produced artifacts in a job's recorded outputs.
//!
//! The server records outputs per node, keyed by media kind (`images`,
//! `audio`). [`find_output`] walks the node map in a preference order and
//! returns the first usable descriptor. [`ArtifactKind`] parameterizes
//! everything that differs between media kinds so a single handler covers
//! both.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Artifact kind
// ---------------------------------------------------------------------------

/// The media kind an invocation expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Audio,
}

impl ArtifactKind {
    /// Parse the `output_kind` input field.
    pub fn from_input(value: &str) -> Result<Self, CoreError> {
        match value {
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            other => Err(CoreError::Validation(format!(
                "Unknown output_kind '{other}'. Must be one of: image, audio"
            ))),
        }
    }

    /// Short label used in messages and diagnostics fields.
    pub fn label(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }

    /// Key of the per-node output collection holding this kind.
    pub fn collection_key(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Audio => "audio",
        }
    }

    /// Content type assumed when the server does not report a usable one.
    pub fn default_content_type(self) -> &'static str {
        match self {
            Self::Image => "image/png",
            Self::Audio => "audio/mpeg",
        }
    }

    /// Content-type prefix a reported type must carry to be trusted.
    pub fn content_type_prefix(self) -> &'static str {
        match self {
            Self::Image => "image/",
            Self::Audio => "audio/",
        }
    }

    /// Node ids searched first when the invocation names none.
    pub fn default_node_ids(self) -> &'static [&'static str] {
        match self {
            Self::Image => &["9"],
            Self::Audio => &["8"],
        }
    }

    /// Response field carrying the base64 payload (`image_base64` /
    /// `audio_base64`).
    pub fn base64_field(self) -> String {
        format!("{}_base64", self.label())
    }

    /// Diagnostics field carrying the failing descriptor (`image_info` /
    /// `audio_info`).
    pub fn info_field(self) -> String {
        format!("{}_info", self.label())
    }
}

// ---------------------------------------------------------------------------
// Output descriptor
// ---------------------------------------------------------------------------

/// Metadata identifying one produced file inside the server's managed
/// storage. A descriptor may arrive without a filename; retrieval rejects
/// it then.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage area within the server, usually `output` or `temp`.
    #[serde(rename = "type", default = "default_storage_type")]
    pub storage_type: String,
}

fn default_storage_type() -> String {
    "output".to_string()
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Find the first usable artifact descriptor in a job's recorded outputs.
///
/// Nodes are visited in preference order: `preferred_nodes` as given,
/// then all remaining keys of `outputs` in document order, skipping
/// duplicates. A node matches when its collection for `kind` is a
/// non-empty array whose first element parses as a descriptor. Returns
/// the descriptor and the owning node id.
pub fn find_output(
    outputs: &Map<String, Value>,
    preferred_nodes: &[String],
    kind: ArtifactKind,
) -> Option<(OutputDescriptor, String)> {
    let mut ordered: Vec<&str> = Vec::with_capacity(preferred_nodes.len() + outputs.len());
    for node_id in preferred_nodes {
        if !ordered.contains(&node_id.as_str()) {
            ordered.push(node_id);
        }
    }
    for node_id in outputs.keys() {
        if !ordered.contains(&node_id.as_str()) {
            ordered.push(node_id);
        }
    }

    for node_id in ordered {
        let Some(node_output) = outputs.get(node_id).and_then(Value::as_object) else {
            continue;
        };
        let Some(items) = node_output.get(kind.collection_key()).and_then(Value::as_array)
        else {
            continue;
        };
        let Some(first) = items.first() else {
            continue;
        };
        if let Ok(descriptor) = serde_json::from_value::<OutputDescriptor>(first.clone()) {
            return Some((descriptor, node_id.to_string()));
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
