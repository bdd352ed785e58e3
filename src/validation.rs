//! Frame checks for known test patterns.
//!
//! Used by the passthrough tests and by the integration tests against the
//! vivid driver set to its 100% colour bar pattern.

use crate::error::{PipelineError, Result};
use crate::traits::{Format, FourCC};

/// RGB of the eight bars after BT.601 conversion, left to right:
/// white, yellow, cyan, green, magenta, red, blue, black.
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235),
    (235, 235, 11),
    (12, 236, 237),
    (13, 237, 13),
    (237, 13, 237),
    (238, 14, 13),
    (15, 15, 239),
    (16, 16, 16),
];

/// Per-channel slack for conversion rounding.
const COLOR_TOLERANCE: u8 = 15;

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = f32::from(y);
    let u = f32::from(u) - 128.0;
    let v = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v, y);
    let g = 0.714_14f32.mul_add(-v, 0.344_14f32.mul_add(-u, y));
    let b = 1.772f32.mul_add(u, y);

    (
        r.clamp(0.0, 255.0) as u8,
        g.clamp(0.0, 255.0) as u8,
        b.clamp(0.0, 255.0) as u8,
    )
}

/// RGB value of pixel (`x`, `y`) in a packed 4:2:2 frame laid out as `format`.
///
/// Honours the row stride. Returns `None` for other pixel formats or
/// coordinates outside the frame.
pub fn pixel_at(frame: &[u8], format: &Format, x: u32, y: u32) -> Option<(u8, u8, u8)> {
    if x >= format.width || y >= format.height {
        return None;
    }
    let offset = y as usize * format.stride as usize + (x / 2) as usize * 4;
    let macropixel = frame.get(offset..offset + 4)?;
    let odd = x % 2 == 1;

    let (luma, u, v) = match (format.fourcc, macropixel) {
        (FourCC::UYVY, &[u, y0, v, y1]) => (if odd { y1 } else { y0 }, u, v),
        (FourCC::YUYV, &[y0, u, y1, v]) => (if odd { y1 } else { y0 }, u, v),
        _ => return None,
    };
    Some(yuv_to_rgb(luma, u, v))
}

fn sample(frame: &[u8], format: &Format, x: u32, y: u32) -> Result<(u8, u8, u8)> {
    pixel_at(frame, format, x, y).ok_or_else(|| {
        PipelineError::Bounds(format!(
            "pixel ({x}, {y}) is not readable in a {}x{} {} frame of {} bytes",
            format.width,
            format.height,
            format.fourcc,
            frame.len()
        ))
    })
}

/// Check the eight vertical colour bars at the middle row.
///
/// # Errors
///
/// [`PipelineError::Bounds`] if the frame is too short for `format`, and
/// [`PipelineError::Mismatch`] if any bar is off by more than the tolerance.
pub fn validate_color_bars(frame: &[u8], format: &Format) -> Result<()> {
    let bar_width = format.width / 8;
    let center_y = format.height / 2;

    for (bar, expected) in (0u32..).zip(SMPTE_COLOR_BARS) {
        let x = bar * bar_width + bar_width / 2;
        let actual = sample(frame, format, x, center_y)?;
        if !colors_match(actual, expected, COLOR_TOLERANCE) {
            return Err(PipelineError::Mismatch(format!(
                "bar {bar} at ({x}, {center_y}): expected RGB{expected:?}, got RGB{actual:?}"
            )));
        }
    }
    Ok(())
}

/// Check that driver sequence numbers increase by exactly one.
pub fn validate_frame_sequence(sequences: &[u32]) -> Result<()> {
    if sequences.is_empty() {
        return Err(PipelineError::Mismatch("no frames to check".to_owned()));
    }
    for (index, pair) in sequences.windows(2).enumerate() {
        if let &[prev, curr] = pair {
            if curr != prev.wrapping_add(1) {
                return Err(PipelineError::Mismatch(format!(
                    "sequence gap after frame {index}: {prev} then {curr}"
                )));
            }
        }
    }
    Ok(())
}

fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    actual.0.abs_diff(expected.0) <= tolerance
        && actual.1.abs_diff(expected.1) <= tolerance
        && actual.2.abs_diff(expected.2) <= tolerance
}
