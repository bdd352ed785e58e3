//! V4L2 capture and video output devices using the v4l crate.
//!
//! Both sides stream through driver mmap buffers and copy to or from their own
//! [`BufferPool`], so the rest of the pipeline only ever sees owned slots.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::mmap::Stream;
use v4l::io::traits::{CaptureStream, OutputStream};
use v4l::video::{Capture, Output};
use v4l::Device;

use crate::config::{CaptureConfig, DisplayConfig};
use crate::error::{keep_first_error, PipelineError, Result};
use crate::pool::{BufferPool, BufferSlot, SlotState};
use crate::traits::{CaptureDevice, Close, DeviceCapabilities, DisplayDevice, Format, FourCC};

fn device_name(path: &Path) -> String {
    path.display().to_string()
}

fn to_format(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

/// Open `path` and check that it advertises every flag in `required`.
fn open_node(path: &Path, required: Flags) -> Result<(Device, DeviceCapabilities)> {
    let name = device_name(path);
    let device = Device::with_path(path).map_err(|err| PipelineError::device(&name, err))?;
    let caps = device
        .query_caps()
        .map_err(|err| PipelineError::device(&name, err))?;

    let capabilities = DeviceCapabilities {
        driver: caps.driver,
        card: caps.card,
        bus_info: caps.bus,
        can_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
        can_output: caps.capabilities.contains(Flags::VIDEO_OUTPUT),
        can_stream: caps.capabilities.contains(Flags::STREAMING),
    };
    if !caps.capabilities.contains(required) {
        return Err(PipelineError::configuration(
            name,
            format!("{} lacks {required:?}", capabilities.card),
        ));
    }
    Ok((device, capabilities))
}

fn check_negotiated(path: &Path, requested: &Format, actual: &Format) -> Result<()> {
    if requested.accepts(actual) {
        Ok(())
    } else {
        Err(PipelineError::configuration(
            device_name(path),
            format!(
                "driver substituted {}x{} {} for {}x{} {}",
                actual.width,
                actual.height,
                actual.fourcc,
                requested.width,
                requested.height,
                requested.fourcc
            ),
        ))
    }
}

/// `VIDIOC_S_FMT` answers EINVAL for a format the node cannot take at all.
fn rejected_format(path: &Path, err: &io::Error) -> PipelineError {
    if err.raw_os_error() == Some(libc::EINVAL) {
        PipelineError::configuration(device_name(path), err.to_string())
    } else {
        PipelineError::device(device_name(path), err)
    }
}

fn buffer_count(path: &Path, count: usize) -> Result<u32> {
    u32::try_from(count)
        .map_err(|_| PipelineError::configuration(device_name(path), format!("{count} buffers")))
}

/// V4L2 capture node (e.g. `/dev/video0`).
pub struct V4L2Capture {
    path: PathBuf,
    capabilities: DeviceCapabilities,
    format: Format,
    stream: Option<Stream<'static>>,
    pool: BufferPool,
}

impl V4L2Capture {
    /// Driver and card reported by the device.
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn closed(&self) -> PipelineError {
        PipelineError::device(device_name(&self.path), "stream is closed")
    }
}

impl CaptureDevice for V4L2Capture {
    type Config = CaptureConfig;

    fn open(config: &Self::Config) -> Result<Self> {
        let path = &config.device;
        let name = device_name(path);
        let (device, capabilities) = open_node(path, Flags::VIDEO_CAPTURE | Flags::STREAMING)?;

        let requested = &config.format;
        let wanted = v4l::Format::new(requested.width, requested.height, requested.fourcc.into());
        let actual =
            Capture::set_format(&device, &wanted).map_err(|err| rejected_format(path, &err))?;
        let format = to_format(&actual);
        check_negotiated(path, requested, &format)?;

        let count = buffer_count(path, config.buffers)?;
        let stream = Stream::with_buffers(&device, Type::VideoCapture, count)
            .map_err(|err| PipelineError::device(&name, err))?;

        info!(
            device = %name,
            card = %capabilities.card,
            width = format.width,
            height = format.height,
            stride = format.stride,
            buffers = count,
            "capture opened"
        );
        Ok(Self {
            path: path.clone(),
            capabilities,
            pool: BufferPool::with_dimensions(
                config.buffers,
                format.size as usize,
                format.dimensions(),
            ),
            format,
            stream: Some(stream),
        })
    }

    fn format(&self) -> &Format {
        &self.format
    }

    fn acquire_buffer(&mut self) -> Result<BufferSlot> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.closed());
        };
        let (data, meta) = CaptureStream::next(stream)
            .map_err(|err| PipelineError::device(device_name(&self.path), err))?;

        let mut slot = self.pool.acquire(SlotState::Producer)?;
        let used = (meta.bytesused as usize).min(data.len());
        slot.fill_from(data.get(..used).unwrap_or(data));
        slot.set_sequence(meta.sequence);
        Ok(slot)
    }

    fn release_buffer(&mut self, slot: BufferSlot) -> Result<()> {
        self.pool.release(slot)
    }
}

impl Close for V4L2Capture {
    fn close(&mut self) -> Result<()> {
        // Dropping the stream issues STREAMOFF and unmaps the driver buffers.
        if self.stream.take().is_some() {
            debug!(
                device = %self.path.display(),
                occupancy = ?self.pool.occupancy(),
                "capture closed"
            );
        }
        Ok(())
    }
}

/// V4L2 video output node (e.g. `/dev/video1`).
pub struct V4L2Display {
    path: PathBuf,
    capabilities: DeviceCapabilities,
    format: Format,
    stream: Option<Stream<'static>>,
    pool: BufferPool,
}

impl V4L2Display {
    /// Driver and card reported by the device.
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }
}

impl DisplayDevice for V4L2Display {
    type Config = DisplayConfig;

    fn open(config: &Self::Config, format: &Format) -> Result<Self> {
        let path = &config.device;
        let name = device_name(path);
        let (device, capabilities) = open_node(path, Flags::VIDEO_OUTPUT | Flags::STREAMING)?;

        let wanted = v4l::Format::new(format.width, format.height, format.fourcc.into());
        let actual =
            Output::set_format(&device, &wanted).map_err(|err| rejected_format(path, &err))?;
        let negotiated = to_format(&actual);
        check_negotiated(path, format, &negotiated)?;

        let count = buffer_count(path, config.buffers)?;
        let stream = Stream::with_buffers(&device, Type::VideoOutput, count)
            .map_err(|err| PipelineError::device(&name, err))?;

        info!(
            device = %name,
            card = %capabilities.card,
            stride = negotiated.stride,
            buffers = count,
            "display opened"
        );
        Ok(Self {
            path: path.clone(),
            capabilities,
            pool: BufferPool::with_dimensions(
                config.buffers,
                negotiated.size as usize,
                negotiated.dimensions(),
            ),
            format: negotiated,
            stream: Some(stream),
        })
    }

    fn format(&self) -> &Format {
        &self.format
    }

    fn buffer_count(&self) -> usize {
        self.pool.capacity()
    }

    fn acquire_buffer(&mut self) -> Result<BufferSlot> {
        self.pool.acquire(SlotState::Producer)
    }

    fn submit_buffer(&mut self, slot: BufferSlot) -> Result<()> {
        let name = device_name(&self.path);
        let Some(stream) = self.stream.as_mut() else {
            let closed = Err(PipelineError::device(name, "stream is closed"));
            return keep_first_error(closed, self.pool.release(slot));
        };

        // The buffer handed out here is queued to the driver on the next call.
        let queued = OutputStream::next(stream).map(|(data, meta)| {
            let len = slot.bytes_used().min(data.len());
            if let (Some(dst), Some(src)) = (data.get_mut(..len), slot.data().get(..len)) {
                dst.copy_from_slice(src);
            }
            meta.bytesused = u32::try_from(len).unwrap_or(u32::MAX);
        });
        let queued = queued.map_err(|err| PipelineError::device(name, err));
        keep_first_error(queued, self.pool.release(slot))
    }
}

impl Close for V4L2Display {
    fn close(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            debug!(
                device = %self.path.display(),
                occupancy = ?self.pool.occupancy(),
                "display closed"
            );
        }
        Ok(())
    }
}
