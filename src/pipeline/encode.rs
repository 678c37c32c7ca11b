//! Image normalisation: model payload bytes → PNG.
//!
//! Image models answer with PNG or JPEG depending on the model. Every
//! generated image is decoded once and re-encoded as PNG before it is stored,
//! so a payload that does not decode is caught while the next candidate can
//! still be tried, and the renderer only ever sees formats it can open.

use crate::error::CandidateError;
use crate::providers::ImagePayload;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Decode `payload` and return it as PNG bytes.
pub fn normalise_to_png(payload: &ImagePayload) -> Result<Vec<u8>, CandidateError> {
    let img = image::load_from_memory(&payload.data).map_err(|e| {
        CandidateError::Malformed(format!("undecodable {} payload: {e}", mime_or_unknown(&payload.mime_type)))
    })?;
    encode_png(&img).map_err(|e| CandidateError::Malformed(format!("PNG re-encode failed: {e}")))
}

/// Encode a decoded image as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    debug!("Encoded {}x{} image → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(buf)
}

fn mime_or_unknown(mime: &str) -> &str {
    if mime.is_empty() {
        "unknown"
    } else {
        mime
    }
}
