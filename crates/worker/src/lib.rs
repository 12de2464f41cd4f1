//! Serverless worker bridging a queue-based invocation host to a
//! ComfyUI-compatible generation server.

pub mod config;
pub mod diagnostics;
pub mod handler;
pub mod host;
