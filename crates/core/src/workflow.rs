//! Generation graph model.
//!
//! A workflow is a JSON object mapping node ids to
//! `{class_type, inputs}` descriptors. The adapter treats it as opaque
//! except for two touch points: binding staged input filenames into node
//! inputs, and wholesale submission to the generation server. Node
//! iteration follows JSON document order, so "first matching node" is
//! deterministic for a given submission.

use serde_json::{Map, Value};

use crate::error::CoreError;

/// Node class that loads an image from the server's input directory.
pub const LOAD_IMAGE_CLASS: &str = "LoadImage";

/// Input field used when binding an image into a loader node.
pub const DEFAULT_IMAGE_FIELD: &str = "image";

/// A parsed generation graph.
#[derive(Debug, Clone)]
pub struct Workflow {
    nodes: Map<String, Value>,
}

impl Workflow {
    /// Parse a workflow from the invocation payload.
    ///
    /// The host sends either a JSON object or a JSON-encoded string.
    /// The graph must be a non-empty object and every node value an
    /// object; node internals are not inspected further.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let value = match value {
            Value::String(raw) => serde_json::from_str(&raw)
                .map_err(|e| CoreError::Validation(format!("Workflow is not valid JSON: {e}")))?,
            other => other,
        };

        let Value::Object(nodes) = value else {
            return Err(CoreError::Validation(
                "Workflow must be an object/map".to_string(),
            ));
        };
        if nodes.is_empty() {
            return Err(CoreError::Validation(
                "Workflow must not be empty".to_string(),
            ));
        }
        for (node_id, node) in &nodes {
            if !node.is_object() {
                return Err(CoreError::Validation(format!(
                    "Workflow node '{node_id}' must be an object"
                )));
            }
        }

        Ok(Self { nodes })
    }

    /// Set an input field on a node, creating the node's `inputs` object
    /// if absent. Returns `false` when the node does not exist or its
    /// `inputs` value is not an object.
    pub fn set_node_input(&mut self, node_id: &str, field: &str, value: Value) -> bool {
        let Some(node) = self.nodes.get_mut(node_id).and_then(Value::as_object_mut) else {
            return false;
        };
        let inputs = node
            .entry("inputs")
            .or_insert_with(|| Value::Object(Map::new()));
        match inputs.as_object_mut() {
            Some(map) => {
                map.insert(field.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// First node (in document order) whose `class_type` matches.
    pub fn first_node_of_class(&self, class_type: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(_, node)| {
                node.get("class_type").and_then(Value::as_str) == Some(class_type)
            })
            .map(|(node_id, _)| node_id.as_str())
    }

    /// Look up a node's input field value.
    pub fn node_input<'a>(&'a self, node_id: &str, field: &str) -> Option<&'a Value> {
        self.nodes.get(node_id)?.get("inputs")?.get(field)
    }

    /// The graph as a JSON value, for submission.
    pub fn to_value(&self) -> Value {
        Value::Object(self.nodes.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
