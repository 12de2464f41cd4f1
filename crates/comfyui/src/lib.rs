//! HTTP client for a ComfyUI-compatible generation server.
//!
//! Provides the REST API wrapper (workflow submission, history
//! retrieval, artifact download), the polling-based job synchronizer,
//! and the startup readiness probe.

pub mod api;
pub mod history;
pub mod poll;
pub mod probe;
