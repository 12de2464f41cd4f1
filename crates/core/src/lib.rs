//! Core domain logic for the generation adapter.
//!
//! Everything here is pure or filesystem-local: the inline payload
//! codec, output compression, input staging and graph binding, artifact
//! locating, and the staging cleanup sweep. Network I/O lives in the
//! `genbridge-comfyui` crate.

pub mod cleanup;
pub mod codec;
pub mod compress;
pub mod error;
pub mod outputs;
pub mod staging;
pub mod workflow;
