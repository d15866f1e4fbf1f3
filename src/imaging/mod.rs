//! Image decoding and the preprocessing pipeline feeding the face engine.

pub mod clahe;

use crate::shared::error::ServiceError;
use image::imageops::FilterType;
use image::RgbImage;

/// Longer image dimension above which the image is downscaled before
/// detection, bounding compute cost.
pub const MAX_DIMENSION: u32 = 1024;

/// Interprets `bytes` as a standard raster image in 8-bit RGB.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, ServiceError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|_| ServiceError::InvalidImage)
}

/// Pure, deterministic transform: local contrast enhancement followed by a
/// size-bounded downscale. Always succeeds given a decoded image.
pub fn preprocess(img: RgbImage) -> RgbImage {
    let enhanced = clahe::enhance_contrast(&img);

    let (width, height) = enhanced.dimensions();
    let longer = width.max(height);
    if longer <= MAX_DIMENSION {
        return enhanced;
    }

    let scale = MAX_DIMENSION as f32 / longer as f32;
    let new_width = (width as f32 * scale) as u32;
    let new_height = (height as f32 * scale) as u32;
    image::imageops::resize(&enhanced, new_width, new_height, FilterType::Lanczos3)
}
