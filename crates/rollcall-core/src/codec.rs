//! Data-URL image codec.
//!
//! Clients send images as `data:image/<fmt>;base64,<payload>`. Everything up
//! to the first comma is ignored; the remainder is base64-decoded and decoded
//! as a raster image in the requested color space.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is not a data URL (no comma separator)")]
    MissingComma,
    #[error("invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image payload is empty")]
    Empty,
    #[error("undecodable image: {0}")]
    Image(#[from] image::ImageError),
}

/// Color space to decode into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    /// 8-bit luma.
    Grayscale,
    /// 8-bit RGB.
    Color,
}

/// Decode a data-URL image payload.
pub fn decode_data_url(payload: &str, color: ColorSpace) -> Result<DynamicImage, DecodeError> {
    let (_, encoded) = payload.split_once(',').ok_or(DecodeError::MissingComma)?;
    let bytes = STANDARD.decode(encoded.trim())?;
    decode_bytes(&bytes, color)
}

/// Decode raw encoded image bytes (JPEG, PNG, ...).
pub fn decode_bytes(bytes: &[u8], color: ColorSpace) -> Result<DynamicImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::Empty);
    }

    Ok(match color {
        ColorSpace::Grayscale => DynamicImage::ImageLuma8(image.to_luma8()),
        ColorSpace::Color => DynamicImage::ImageRgb8(image.to_rgb8()),
    })
}

/// Encode bytes as a data URL with the given MIME type.
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}
