//! Inline payload codec for invocation inputs and responses.
//!
//! Invocations carry input media inline as `data:` URIs and receive the
//! produced artifact back as base64. This module owns both directions,
//! plus the size sanity bounds applied to decoded payloads.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Size bounds
// ---------------------------------------------------------------------------

/// Decoded payloads under this size are rejected as corrupt.
pub const MIN_DECODED_BYTES: usize = 32;

/// Default ceiling on decoded input size (15 MiB).
pub const DEFAULT_MAX_INPUT_BYTES: usize = 15 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A decoded inline payload with its declared content type.
#[derive(Debug, Clone)]
pub struct DecodedPayload {
    pub bytes: Vec<u8>,
    /// Lowercased content type from the URI, e.g. `image/png`.
    pub content_type: String,
}

/// Shape: `data:<image/*-type>;base64,<payload>`. The payload may contain
/// embedded whitespace (stripped before decoding).
fn data_uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)^data:(image/[a-z0-9.+-]+);base64,(.+)$")
            .expect("data URI pattern is valid")
    })
}

/// Decode an `image/*` data URI into raw bytes plus its content type.
///
/// Rejects a missing or malformed URI, invalid base64, payloads smaller
/// than [`MIN_DECODED_BYTES`], and payloads larger than `max_bytes`.
pub fn decode_data_uri(data_uri: &str, max_bytes: usize) -> Result<DecodedPayload, CoreError> {
    let trimmed = data_uri.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Missing image data URI".to_string()));
    }

    let captures = data_uri_pattern()
        .captures(trimmed)
        .ok_or_else(|| CoreError::Validation("Invalid data URI format".to_string()))?;

    let content_type = captures[1].to_ascii_lowercase();
    let payload: String = captures[2].chars().filter(|c| !c.is_whitespace()).collect();

    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(|_| CoreError::Validation("Invalid base64 image payload".to_string()))?;

    if bytes.len() < MIN_DECODED_BYTES {
        return Err(CoreError::Validation(
            "Decoded image payload is too small".to_string(),
        ));
    }
    if bytes.len() > max_bytes {
        return Err(CoreError::Validation(format!(
            "Input image exceeds max size ({max_bytes} bytes)"
        )));
    }

    Ok(DecodedPayload {
        bytes,
        content_type,
    })
}

// ---------------------------------------------------------------------------
// Content-type mapping
// ---------------------------------------------------------------------------

/// Map a content type to the staging file extension. Unknown types
/// default to `png`.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        _ => "png",
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Standard-alphabet base64 encoding for the response payload.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
