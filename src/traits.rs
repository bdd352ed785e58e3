//! Core traits and types for the capture, display and audio devices.

use crate::error::{PipelineError, Result};
use crate::pool::BufferSlot;

/// Pixel format representation (e.g., UYVY, YUYV, AR24).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// UYVY pixel format (4:2:2 packed, chroma first).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// YUYV pixel format (4:2:2 packed, luma first).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// 32-bit ARGB, little-endian in memory (B, G, R, A).
    pub const ARGB: Self = Self::new(b"AR24");

    /// Bytes occupied by one pixel, `None` for formats this crate does not lay out.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> Option<u32> {
        match &self.0 {
            b"UYVY" | b"YUYV" => Some(2),
            b"AR24" => Some(4),
            _ => None,
        }
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{}", char::from(byte))?;
        }
        Ok(())
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a packed format specification (no line padding).
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let bpp = match fourcc.bytes_per_pixel() {
            Some(bpp) => bpp,
            None => 2,
        };
        let stride = width * bpp;
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }

    /// Layout of a whole frame in this format, anchored at the origin.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
            stride: self.stride,
            x: 0,
            y: 0,
        }
    }

    /// Whether the driver-negotiated `actual` format matches this request.
    ///
    /// Stride and size are allowed to grow (drivers may pad lines); geometry
    /// and pixel format must be identical.
    #[must_use]
    pub fn accepts(&self, actual: &Self) -> bool {
        self.width == actual.width
            && self.height == actual.height
            && self.fourcc == actual.fourcc
            && actual.stride >= self.stride
    }
}

/// Geometry of a pixel buffer and where it is to be composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Line length in bytes.
    pub stride: u32,
    /// Horizontal origin inside the container, in pixels.
    pub x: u32,
    /// Vertical origin inside the container, in pixels.
    pub y: u32,
}

impl Dimensions {
    /// Packed layout (`stride == width * bytes_per_pixel`) at the origin.
    #[must_use]
    pub const fn packed(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            stride: width * bytes_per_pixel,
            x: 0,
            y: 0,
        }
    }

    /// Same geometry moved to `(x, y)`.
    #[must_use]
    pub const fn with_origin(mut self, x: u32, y: u32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Bytes needed to hold `height` lines of `stride` bytes.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Check `stride >= width * bytes_per_pixel`.
    pub fn validate(&self, bytes_per_pixel: u32) -> Result<()> {
        let row = u64::from(self.width) * u64::from(bytes_per_pixel);
        if u64::from(self.stride) < row {
            return Err(PipelineError::Bounds(format!(
                "stride {} is shorter than {} pixels of {bytes_per_pixel} bytes",
                self.stride, self.width
            )));
        }
        Ok(())
    }

    /// Check that this rectangle, at its origin, lies inside `container`.
    pub fn validate_within(&self, container: &Self) -> Result<()> {
        let right = u64::from(self.x) + u64::from(self.width);
        let bottom = u64::from(self.y) + u64::from(self.height);
        if right > u64::from(container.width) || bottom > u64::from(container.height) {
            return Err(PipelineError::Bounds(format!(
                "{}x{} at ({}, {}) exceeds {}x{} container",
                self.width, self.height, self.x, self.y, container.width, container.height
            )));
        }
        Ok(())
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device can output video.
    pub can_output: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Orderly teardown of an acquired resource.
///
/// `close` is called exactly once, when the resource is drained.
pub trait Close {
    /// Release the underlying hardware or memory.
    fn close(&mut self) -> Result<()>;
}

/// A video source that fills pool slots with captured frames.
pub trait CaptureDevice: Close + Sized + Send {
    /// Parameters needed to open the device.
    type Config: Send;

    /// Open the device and negotiate `config`, failing fast on any substitution.
    fn open(config: &Self::Config) -> Result<Self>;

    /// Negotiated frame format.
    fn format(&self) -> &Format;

    /// Block until the next captured frame is available.
    fn acquire_buffer(&mut self) -> Result<BufferSlot>;

    /// Hand a captured frame back to the driver queue.
    fn release_buffer(&mut self, slot: BufferSlot) -> Result<()>;
}

/// A video sink that displays pool slots filled by the application.
pub trait DisplayDevice: Close + Sized + Send {
    /// Parameters needed to open the device.
    type Config: Send;

    /// Open the device for frames of `format`, failing fast on any substitution.
    fn open(config: &Self::Config, format: &Format) -> Result<Self>;

    /// Negotiated frame format.
    fn format(&self) -> &Format;

    /// Number of display buffers the device rotates through.
    fn buffer_count(&self) -> usize;

    /// Block until a display slot is free for writing.
    fn acquire_buffer(&mut self) -> Result<BufferSlot>;

    /// Queue a filled slot for display.
    fn submit_buffer(&mut self, slot: BufferSlot) -> Result<()>;
}

/// A full-duplex audio endpoint exchanging fixed-size blocks.
pub trait AudioDevice: Close + Sized + Send {
    /// Parameters needed to open the device.
    type Config: Send;

    /// Open capture and playback. The sample rate may be substituted with the
    /// nearest supported one; read it back with [`AudioDevice::sample_rate`].
    fn open(config: &Self::Config) -> Result<Self>;

    /// Effective sample rate after negotiation.
    fn sample_rate(&self) -> u32;

    /// Bytes in one block.
    fn block_bytes(&self) -> usize;

    /// Read exactly one block from the input.
    fn acquire_buffer(&mut self) -> Result<BufferSlot>;

    /// Write one block to the output.
    ///
    /// Returns [`PipelineError::Underrun`] when playback ran dry; the caller
    /// must [`prepare`](AudioDevice::prepare) and retry the same block.
    fn write_buffer(&mut self, slot: &BufferSlot) -> Result<()>;

    /// Re-arm the output after an underrun.
    fn prepare(&mut self) -> Result<()>;

    /// Return a block to the device pool.
    fn release_buffer(&mut self, slot: BufferSlot) -> Result<()>;
}
