//! Source image loading.
//!
//! Image decoding is plain I/O around the `image` crate; the interesting
//! lifetime questions (staging ownership, upload completion) live in the
//! graphics crate.

use std::path::Path;

use cinder_graphics::GraphicsError;

/// A decoded RGBA8 image.
#[derive(Debug)]
pub struct DecodedImage {
    /// Tightly packed RGBA8 texels, row-major.
    pub pixels: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Decode an image file to RGBA8.
///
/// A malformed or missing source asset is a fatal setup failure.
pub fn load_image(path: &Path) -> Result<DecodedImage, GraphicsError> {
    let decoded = image::open(path).map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "failed to decode image {}: {}",
            path.display(),
            e
        ))
    })?;

    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    log::info!("Loaded {} ({}x{})", path.display(), width, height);

    Ok(DecodedImage {
        pixels: rgba.into_raw(),
        width,
        height,
    })
}

/// Generate a gradient test pattern, used when no image path is given.
pub fn test_pattern(width: u32, height: u32) -> DecodedImage {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            let b = ((x + y) * 255 / (width + height).max(1)) as u8;
            pixels.extend_from_slice(&[r, g, b, 255]);
        }
    }
    DecodedImage {
        pixels,
        width,
        height,
    }
}
