//! OSD compositing on 32-bit ARGB frame buffers.
//!
//! Every operation validates the geometry of both buffers before touching a
//! single byte, so a bad origin is rejected with [`PipelineError::Bounds`]
//! instead of corrupting adjacent memory. Source and target strides are
//! honored independently.

use crate::error::{PipelineError, Result};
use crate::picture::PictureAsset;
use crate::traits::Dimensions;

/// Bytes per ARGB pixel.
pub const BYTES_PER_PIXEL: u32 = 4;

/// Normalized distance beyond which the circular mask paints the fill color.
/// A value of 1.0 would exactly touch the screen border.
pub const MASK_RADIUS: f32 = 0.9;

/// A writable ARGB pixel buffer and its layout.
#[derive(Debug)]
pub struct SurfaceMut<'a> {
    data: &'a mut [u8],
    dimensions: Dimensions,
}

impl<'a> SurfaceMut<'a> {
    /// Wrap `data` laid out as `dimensions`.
    pub fn new(data: &'a mut [u8], dimensions: Dimensions) -> Self {
        Self { data, dimensions }
    }

    /// Layout of the surface.
    pub const fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    fn validate(&self) -> Result<()> {
        self.dimensions.validate(BYTES_PER_PIXEL)?;
        check_len("target", self.data.len(), &self.dimensions)
    }

    fn row_mut(&mut self, row: u32, x: u32, width: u32) -> Result<&mut [u8]> {
        row_range(self.dimensions.stride, row, x, width)
            .and_then(|range| self.data.get_mut(range))
            .ok_or_else(|| PipelineError::Bounds(format!("target row {row} out of range")))
    }
}

fn check_len(what: &str, len: usize, dimensions: &Dimensions) -> Result<()> {
    if dimensions.height == 0 {
        return Ok(());
    }
    let needed = dimensions.stride as usize * (dimensions.height as usize - 1)
        + dimensions.width as usize * BYTES_PER_PIXEL as usize;
    if len < needed {
        return Err(PipelineError::Bounds(format!(
            "{what} holds {len} bytes, {}x{} with stride {} needs {needed}",
            dimensions.width, dimensions.height, dimensions.stride
        )));
    }
    Ok(())
}

fn row_range(stride: u32, row: u32, x: u32, width: u32) -> Option<std::ops::Range<usize>> {
    let start = (row as usize)
        .checked_mul(stride as usize)?
        .checked_add(x as usize * BYTES_PER_PIXEL as usize)?;
    let end = start.checked_add(width as usize * BYTES_PER_PIXEL as usize)?;
    Some(start..end)
}

fn picture_row(picture: &PictureAsset, row: u32) -> Result<&[u8]> {
    let dimensions = picture.dimensions();
    row_range(dimensions.stride, row, 0, dimensions.width)
        .and_then(|range| picture.pixels().get(range))
        .ok_or_else(|| PipelineError::Bounds(format!("picture row {row} out of range")))
}

fn validate_placement(
    target: &SurfaceMut<'_>,
    picture: &PictureAsset,
    x: u32,
    y: u32,
) -> Result<Dimensions> {
    target.validate()?;
    let placed = picture.dimensions().with_origin(x, y);
    placed.validate(BYTES_PER_PIXEL)?;
    check_len("picture", picture.pixels().len(), &placed)?;
    placed.validate_within(target.dimensions())?;
    Ok(placed)
}

/// Copy `picture` into `target` at the picture's own origin.
pub fn place(target: &mut SurfaceMut<'_>, picture: &PictureAsset) -> Result<()> {
    let origin = picture.dimensions();
    place_at(target, picture, origin.x, origin.y)
}

/// Copy `picture` into `target` with its top-left corner at `(x, y)`.
pub fn place_at(target: &mut SurfaceMut<'_>, picture: &PictureAsset, x: u32, y: u32) -> Result<()> {
    let placed = validate_placement(target, picture, x, y)?;

    for row in 0..placed.height {
        let src = picture_row(picture, row)?;
        target.row_mut(y + row, x, placed.width)?.copy_from_slice(src);
    }
    Ok(())
}

/// Composite `picture` at its origin with a wrap-around read.
///
/// Destination row `r` takes source row `(r + y_offset) mod height`, written as
/// the segment `[x_offset, width)` followed by `[0, x_offset)`. Offsets are
/// reduced modulo the picture size, so advancing either by a full period leaves
/// the output unchanged.
pub fn scroll(
    target: &mut SurfaceMut<'_>,
    picture: &PictureAsset,
    x_offset: u32,
    y_offset: u32,
) -> Result<()> {
    let origin = picture.dimensions();
    let placed = validate_placement(target, picture, origin.x, origin.y)?;
    if placed.width == 0 || placed.height == 0 {
        return Ok(());
    }

    let x_offset = x_offset % placed.width;
    let y_offset = y_offset % placed.height;
    let split = (x_offset * BYTES_PER_PIXEL) as usize;
    let tail_len = ((placed.width - x_offset) * BYTES_PER_PIXEL) as usize;

    for row in 0..placed.height {
        let src = picture_row(picture, (row + y_offset) % placed.height)?;
        let (head, tail) = src
            .split_at_checked(split)
            .ok_or_else(|| PipelineError::Bounds(format!("scroll offset {x_offset}")))?;

        let dst = target.row_mut(placed.y + row, placed.x, placed.width)?;
        let (left, right) = dst
            .split_at_mut_checked(tail_len)
            .ok_or_else(|| PipelineError::Bounds(format!("scroll offset {x_offset}")))?;
        left.copy_from_slice(tail);
        right.copy_from_slice(head);
    }
    Ok(())
}

/// Paint an elliptical vignette around the whole target.
///
/// Pixels whose normalized distance `(dx/hw)² + (dy/hh)²` from the center
/// exceeds [`MASK_RADIUS`] become `fill_rgb` with `alpha` in the top byte;
/// pixels inside become fully transparent black.
#[allow(clippy::cast_precision_loss)]
pub fn draw_circular_mask(target: &mut SurfaceMut<'_>, fill_rgb: u32, alpha: u8) -> Result<()> {
    target.validate()?;
    let Dimensions { width, height, .. } = *target.dimensions();
    if width < 2 || height < 2 {
        return Err(PipelineError::Bounds(format!(
            "{width}x{height} surface is too small for a circular mask"
        )));
    }

    let fill = ((fill_rgb & 0x00FF_FFFF) | (u32::from(alpha) << 24)).to_le_bytes();
    let blank = [0u8; 4];
    let x_scale = (width >> 1) as f32;
    let y_scale = (height >> 1) as f32;

    for j in 0..height {
        let y = j as f32 - y_scale;
        let y_term = y * y / (y_scale * y_scale);
        let row = target.row_mut(j, 0, width)?;
        for (i, pixel) in row.chunks_exact_mut(BYTES_PER_PIXEL as usize).enumerate() {
            let x = i as f32 - x_scale;
            let distance = x * x / (x_scale * x_scale) + y_term;
            pixel.copy_from_slice(if distance > MASK_RADIUS { &fill } else { &blank });
        }
    }
    Ok(())
}
