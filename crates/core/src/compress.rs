//! Best-effort output re-encoding for transfer-size reduction.
//!
//! Produced artifacts travel back to the host inline as base64, so a
//! smaller encoding directly cuts response size. Re-encoding is strictly
//! best-effort: any decode or encode failure returns the original bytes
//! untouched together with a diagnostic note for the logs.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, RgbImage};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Bodies under this size are not worth re-encoding.
pub const MIN_COMPRESS_BYTES: usize = 1000;

/// Default output quality when none is configured.
pub const DEFAULT_QUALITY: u8 = 82;

// ---------------------------------------------------------------------------
// Output format
// ---------------------------------------------------------------------------

/// Target encoding for produced images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Webp,
}

impl OutputFormat {
    /// Parse a configured format name. `JPEG`, `JPG`, and `WEBP` are
    /// recognized case-insensitively; anything else falls back to JPEG.
    pub fn from_config(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "WEBP" => Self::Webp,
            _ => Self::Jpeg,
        }
    }

    /// Content type of the re-encoded output.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }
}

// ---------------------------------------------------------------------------
// Re-encoding
// ---------------------------------------------------------------------------

/// Result of a re-encode attempt. `bytes`/`content_type` are the original
/// values whenever the attempt was skipped or failed; `note` carries the
/// reason in that case.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub note: Option<String>,
}

impl CompressionOutcome {
    fn unchanged(bytes: Vec<u8>, content_type: &str, note: Option<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.to_string(),
            note,
        }
    }
}

/// Re-encode an artifact to the target format at a clamped quality.
///
/// Quality applies to JPEG; the WEBP encoder is lossless. JPEG output has
/// no alpha channel, so transparent sources are flattened onto a white
/// background first. Never fails: problems downgrade to a `note`.
pub fn compress_artifact(
    bytes: Vec<u8>,
    content_type: &str,
    format: OutputFormat,
    quality: u8,
) -> CompressionOutcome {
    if bytes.len() < MIN_COMPRESS_BYTES {
        return CompressionOutcome::unchanged(bytes, content_type, None);
    }

    let quality = quality.clamp(1, 100);

    let img = match image::load_from_memory(&bytes) {
        Ok(img) => img,
        Err(e) => {
            return CompressionOutcome::unchanged(
                bytes,
                content_type,
                Some(format!("Compression skipped, decode failed: {e}")),
            );
        }
    };

    let mut out = Vec::new();
    let result = match format {
        OutputFormat::Jpeg => encode_jpeg(&img, quality, &mut out),
        OutputFormat::Webp => encode_webp(&img, &mut out),
    };

    if let Err(e) = result {
        return CompressionOutcome::unchanged(
            bytes,
            content_type,
            Some(format!("Compression failed: {e}")),
        );
    }
    if out.is_empty() {
        return CompressionOutcome::unchanged(
            bytes,
            content_type,
            Some("Compression produced empty payload".to_string()),
        );
    }

    let note = (out.len() > bytes.len()).then(|| {
        format!(
            "Re-encode grew payload from {} to {} bytes",
            bytes.len(),
            out.len()
        )
    });

    CompressionOutcome {
        bytes: out,
        content_type: format.content_type().to_string(),
        note,
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8, out: &mut Vec<u8>) -> image::ImageResult<()> {
    // JPEG has no alpha channel.
    let rgb = if img.color().has_alpha() {
        flatten_onto_white(img)
    } else {
        img.to_rgb8()
    };
    let mut encoder = JpegEncoder::new_with_quality(out, quality);
    encoder.encode_image(&rgb)
}

fn encode_webp(img: &DynamicImage, out: &mut Vec<u8>) -> image::ImageResult<()> {
    let encoder = WebPEncoder::new_lossless(out);
    if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        encoder.encode(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)
    } else {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        encoder.encode(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
    }
}

/// Composite a transparent image onto a white background through its
/// alpha mask.
fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        let blend = |channel: u8| -> u8 {
            ((channel as u32 * alpha + 255 * (255 - alpha)) / 255) as u8
        };
        rgb.put_pixel(
            x,
            y,
            image::Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]),
        );
    }
    rgb
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A noisy RGBA test image: the left half is fully transparent, the
    /// right half opaque pseudo-noise (so the PNG stays above the
    /// re-encode size floor).
    fn noisy_rgba_png() -> Vec<u8> {
        let mut buf = image::RgbaImage::new(64, 64);
        for (x, y, pixel) in buf.enumerate_pixels_mut() {
            let v = ((x * 31 + y * 17) % 251) as u8;
            if x < 32 {
                *pixel = image::Rgba([v, 255 - v, v / 2, 0]);
            } else {
                *pixel = image::Rgba([v, v.wrapping_mul(3), 255 - v, 255]);
            }
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(buf)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        assert!(bytes.len() >= MIN_COMPRESS_BYTES, "test image too small");
        bytes
    }

    // -- OutputFormat ---------------------------------------------------------

    #[test]
    fn format_parsing() {
        assert_eq!(OutputFormat::from_config("JPEG"), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_config("jpg"), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_config(" webp "), OutputFormat::Webp);
        assert_eq!(OutputFormat::from_config("tiff"), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_config(""), OutputFormat::Jpeg);
    }

    // -- pass-through paths ---------------------------------------------------

    #[test]
    fn small_bodies_pass_through_unchanged() {
        let bytes = vec![5u8; MIN_COMPRESS_BYTES - 1];
        let outcome = compress_artifact(bytes.clone(), "image/png", OutputFormat::Jpeg, 80);
        assert_eq!(outcome.bytes, bytes);
        assert_eq!(outcome.content_type, "image/png");
        assert!(outcome.note.is_none());
    }

    #[test]
    fn undecodable_bodies_pass_through_with_note() {
        let bytes = vec![0u8; MIN_COMPRESS_BYTES + 500];
        let outcome = compress_artifact(bytes.clone(), "image/png", OutputFormat::Jpeg, 80);
        assert_eq!(outcome.bytes, bytes);
        assert_eq!(outcome.content_type, "image/png");
        assert!(outcome.note.unwrap().contains("decode failed"));
    }

    // -- JPEG -----------------------------------------------------------------

    #[test]
    fn jpeg_output_has_jpeg_content_type() {
        let png = noisy_rgba_png();
        let outcome = compress_artifact(png, "image/png", OutputFormat::Jpeg, 80);
        assert_eq!(outcome.content_type, "image/jpeg");
        let decoded = image::load_from_memory(&outcome.bytes).unwrap();
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn jpeg_flattens_transparency_onto_white() {
        let png = noisy_rgba_png();
        let outcome = compress_artifact(png, "image/png", OutputFormat::Jpeg, 90);
        assert_eq!(outcome.content_type, "image/jpeg");

        let decoded = image::load_from_memory(&outcome.bytes).unwrap().to_rgb8();
        // Sample deep inside the fully-transparent half; JPEG quantization
        // keeps a flat white region within a couple of values of 255.
        let pixel = decoded.get_pixel(8, 32);
        for channel in pixel.0 {
            assert!(channel >= 245, "expected near-white, got {:?}", pixel.0);
        }
    }

    // -- WEBP -----------------------------------------------------------------

    #[test]
    fn webp_output_has_webp_content_type() {
        let png = noisy_rgba_png();
        let outcome = compress_artifact(png, "image/png", OutputFormat::Webp, 80);
        assert_eq!(outcome.content_type, "image/webp");
        assert!(!outcome.bytes.is_empty());
        // RIFF container magic.
        assert_eq!(&outcome.bytes[..4], b"RIFF");
    }

    #[test]
    fn quality_is_clamped_not_rejected() {
        let png = noisy_rgba_png();
        let outcome = compress_artifact(png, "image/png", OutputFormat::Jpeg, 0);
        assert_eq!(outcome.content_type, "image/jpeg");
    }
}
