use std::sync::Arc;

use image::DynamicImage;

use crate::camera::{CameraError, Dimension};

// Decode fetched bytes into an image
pub fn decode_image(image_data: &[u8]) -> Result<DynamicImage, CameraError> {
    image::load_from_memory(image_data)
        .map_err(|e| CameraError::Decode(format!("Failed to load image: {}", e)))
}

/// Computes the size an image of `source` size is scaled to so that it fits
/// into `requested` without changing the aspect ratio.
///
/// Returns `None` when the image must be left alone: it already fits along the
/// constraining axis, which also rules out upscaling.
pub fn fit_dimension(source: Dimension, requested: Dimension) -> Option<Dimension> {
    if source.width == 0 || source.height == 0 {
        return None;
    }

    let (src_w, src_h) = (source.width as u64, source.height as u64);
    let (req_w, req_h) = (requested.width as u64, requested.height as u64);

    // zero means: derive proportionally from the other side
    let (width, height) = if req_w * src_h / src_w < req_h {
        (src_w.min(req_w), 0)
    } else {
        (0, src_h.min(req_h))
    };

    if width == src_w || height == src_h {
        return None;
    }

    let (width, height) = if height == 0 {
        (width, proportional(width, src_h, src_w))
    } else {
        (proportional(height, src_w, src_h), height)
    };

    Some(Dimension::new(width.max(1) as u32, height.max(1) as u32))
}

fn proportional(fixed: u64, other: u64, base: u64) -> u64 {
    ((fixed as f64 * other as f64 / base as f64) + 0.5) as u64
}

// Scale (only if needed) and encode as JPEG at the given quality
pub fn resize_image(
    img: &Arc<DynamicImage>,
    requested: Dimension,
    quality: u8,
) -> Result<(Vec<u8>, Arc<DynamicImage>), CameraError> {
    let resized = match fit_dimension(Dimension::of_image(img), requested) {
        // area averaging, the same as a box filter when downscaling
        Some(target) => Arc::new(img.thumbnail_exact(target.width, target.height)),
        None => Arc::clone(img),
    };

    let output = encode_jpeg(&resized, quality)?;
    Ok((output, resized))
}

pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CameraError> {
    let mut output = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality.clamp(1, 100));

    // JPEG has no alpha channel, hand the encoder plain RGB
    let converted;
    let rgb = match img {
        DynamicImage::ImageRgb8(buf) => buf,
        other => {
            converted = other.to_rgb8();
            &converted
        }
    };

    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
        .map_err(|e| CameraError::Encode(format!("JPEG encoding failed: {}", e)))?;

    Ok(output)
}
