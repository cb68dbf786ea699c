//! Turning caller payloads into RGB frames.

use base64::Engine as _;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decode an encoded image (PNG, JPEG, ...) into RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, FrameError> {
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgb8())
}

/// Decode a base64 image payload, with or without a `data:image/...;base64,` prefix.
pub fn decode_base64(payload: &str) -> Result<RgbImage, FrameError> {
    let payload = payload.trim();
    let data = match payload.split_once(',') {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => payload,
    };
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
    decode_image(&bytes)
}

/// Read and decode an image file.
pub fn load(path: impl AsRef<Path>) -> Result<RgbImage, FrameError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| FrameError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_image(&bytes)
}
