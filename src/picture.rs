//! Decoded OSD pictures with alpha baked in at load time.

use std::path::Path;

use tracing::debug;

use crate::compositor::BYTES_PER_PIXEL;
use crate::error::{PipelineError, Result};
use crate::traits::{Close, Dimensions};

/// Immutable ARGB pixel buffer, stored little-endian (B, G, R, A per pixel).
///
/// The alpha byte is fixed when the asset is built so compositing never has to
/// recompute it per frame. Share it between workers as `Arc<PictureAsset>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureAsset {
    pixels: Vec<u8>,
    dimensions: Dimensions,
}

impl PictureAsset {
    /// Wrap packed ARGB pixels.
    pub fn from_argb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let dimensions = Dimensions::packed(width, height, BYTES_PER_PIXEL);
        if pixels.len() != dimensions.byte_len() {
            return Err(PipelineError::Bounds(format!(
                "{width}x{height} picture needs {} bytes, got {}",
                dimensions.byte_len(),
                pixels.len()
            )));
        }
        Ok(Self { pixels, dimensions })
    }

    /// Build from packed top-down RGB triplets, giving every pixel `alpha`.
    pub fn from_rgb(width: u32, height: u32, rgb: &[u8], alpha: u8) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(PipelineError::Bounds(format!(
                "{width}x{height} RGB picture needs {expected} bytes, got {}",
                rgb.len()
            )));
        }
        let pixels = rgb
            .chunks_exact(3)
            .flat_map(|px| match px {
                [r, g, b] => [*b, *g, *r, alpha],
                _ => [0, 0, 0, alpha],
            })
            .collect();
        Self::from_argb(width, height, pixels)
    }

    /// Same picture, to be placed with its top-left corner at `(x, y)`.
    #[must_use]
    pub const fn with_origin(mut self, x: u32, y: u32) -> Self {
        self.dimensions = self.dimensions.with_origin(x, y);
        self
    }

    /// Size, stride and placement origin.
    pub const fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    /// Raw pixel bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// ARGB value of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.dimensions.width || y >= self.dimensions.height {
            return None;
        }
        let start = y as usize * self.dimensions.stride as usize + x as usize * 4;
        let bytes = self.pixels.get(start..start + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }
}

impl Close for PictureAsset {
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Turns an image file into a [`PictureAsset`] of a known size.
pub trait ImageDecoder: Send + Sync {
    /// Decode `path`, which must be exactly `width` x `height`, giving every pixel `alpha`.
    fn decode(&self, path: &Path, width: u32, height: u32, alpha: u8) -> Result<PictureAsset>;
}

/// Decoder for 24-bit bitmap files (and anything else the `image` crate reads).
#[derive(Debug, Clone, Copy, Default)]
pub struct BmpDecoder;

impl ImageDecoder for BmpDecoder {
    fn decode(&self, path: &Path, width: u32, height: u32, alpha: u8) -> Result<PictureAsset> {
        let decode_error = |reason: String| PipelineError::Decode {
            path: path.to_path_buf(),
            reason,
        };

        let image = image::open(path).map_err(|err| decode_error(err.to_string()))?;
        if image.width() != width || image.height() != height {
            return Err(decode_error(format!(
                "expected {width}x{height}, file is {}x{}",
                image.width(),
                image.height()
            )));
        }

        let rgb = image.to_rgb8();
        debug!(path = %path.display(), width, height, alpha, "decoded OSD picture");
        PictureAsset::from_rgb(width, height, rgb.as_raw(), alpha)
            .map_err(|err| decode_error(err.to_string()))
    }
}
