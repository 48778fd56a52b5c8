use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Image payload is empty")]
    Empty,
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Unreadable image data: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a browser data URL (`data:image/jpeg;base64,...`) into RGB pixels.
///
/// Everything up to and including the first comma is treated as the
/// prefix. A bare base64 string without a prefix is accepted as well.
pub fn decode_data_url(payload: &str) -> Result<RgbImage, DecodeError> {
    let encoded = match payload.split_once(',') {
        Some((_prefix, data)) => data,
        None => payload,
    };

    // Browsers never wrap, but pasted payloads sometimes carry newlines
    let encoded: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = STANDARD.decode(encoded.as_bytes())?;
    decode_bytes(&bytes)
}

/// Decode encoded image bytes (JPEG, PNG, ...) into 8-bit RGB
pub fn decode_bytes(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let img = image::load_from_memory(bytes)?;
    log::debug!(
        "Decoded {}x{} image ({:?}) to RGB",
        img.width(),
        img.height(),
        img.color()
    );
    Ok(img.to_rgb8())
}
