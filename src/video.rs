//! Video passthrough: capture → display, one frame per iteration.

use tracing::{debug, info};

use crate::error::{keep_first_error, PipelineError, Result};
use crate::pool::BufferSlot;
use crate::traits::{CaptureDevice, DisplayDevice, Format};
use crate::worker::{ResourceLedger, ThreadEnvironment, Worker};

/// Worker copying every captured frame into a display buffer.
pub struct VideoWorker<C: CaptureDevice, D: DisplayDevice> {
    capture: C::Config,
    display: D::Config,
    frames: u64,
}

impl<C: CaptureDevice, D: DisplayDevice> VideoWorker<C, D> {
    /// Worker that will open `capture`, then `display` with the capture's format.
    pub const fn new(capture: C::Config, display: D::Config) -> Self {
        Self {
            capture,
            display,
            frames: 0,
        }
    }

    /// Frames passed through so far.
    pub const fn frames(&self) -> u64 {
        self.frames
    }
}

impl<C, D> Worker for VideoWorker<C, D>
where
    C: CaptureDevice + 'static,
    D: DisplayDevice + 'static,
    C::Config: 'static,
    D::Config: 'static,
{
    fn name(&self) -> &'static str {
        "video"
    }

    fn execute(&mut self, env: &ThreadEnvironment, ledger: &ResourceLedger) -> Result<()> {
        let mut capture = ledger.acquire("capture", || C::open(&self.capture))?;
        let format = capture.format().clone();
        let mut display = ledger.acquire("display", || D::open(&self.display, &format))?;
        ledger.running();
        info!(
            worker = env.name(),
            width = format.width,
            height = format.height,
            fourcc = %format.fourcc,
            "video passthrough running"
        );

        while !env.should_quit() {
            pass_frame(&mut *capture, &mut *display)?;
            self.frames += 1;
        }

        debug!(worker = env.name(), frames = self.frames, "video loop exited");
        ledger.begin_drain();
        Ok(())
    }
}

/// Move one frame from `capture` to `display`.
///
/// The captured slot goes back to the capture device whatever happens to the
/// display side.
pub fn pass_frame<C: CaptureDevice, D: DisplayDevice>(
    capture: &mut C,
    display: &mut D,
) -> Result<()> {
    let captured = capture.acquire_buffer()?;
    let mut shown = match display.acquire_buffer() {
        Ok(slot) => slot,
        Err(err) => return keep_first_error(Err(err), capture.release_buffer(captured)),
    };

    let copied = copy_frame(&captured, capture.format(), &mut shown, display.format());
    let released = capture.release_buffer(captured);
    let submitted = display.submit_buffer(shown);
    keep_first_error(keep_first_error(copied, released), submitted)
}

/// Copy the visible lines of `source` into `target`, honoring both strides.
pub fn copy_frame(
    source: &BufferSlot,
    source_format: &Format,
    target: &mut BufferSlot,
    target_format: &Format,
) -> Result<()> {
    let bpp = source_format.fourcc.bytes_per_pixel().ok_or_else(|| {
        PipelineError::Bounds(format!("unsupported pixel format {}", source_format.fourcc))
    })?;
    let width = source_format.width.min(target_format.width);
    let height = source_format.height.min(target_format.height);
    let row_bytes = width as usize * bpp as usize;
    let (src_stride, dst_stride) = (source_format.stride as usize, target_format.stride as usize);

    if src_stride < row_bytes || dst_stride < row_bytes {
        return Err(PipelineError::Bounds(format!(
            "{row_bytes}-byte rows do not fit strides {src_stride}/{dst_stride}"
        )));
    }
    let needed = |stride: usize| stride * (height as usize).saturating_sub(1) + row_bytes;
    if source.data().len() < needed(src_stride) || target.capacity() < needed(dst_stride) {
        return Err(PipelineError::Bounds(format!(
            "{width}x{height} frame does not fit {} -> {} byte buffers",
            source.data().len(),
            target.capacity()
        )));
    }

    let src_rows = source.data().chunks(src_stride);
    let dst_rows = target.data_mut().chunks_mut(dst_stride);
    for (src, dst) in src_rows.zip(dst_rows).take(height as usize) {
        if let (Some(src), Some(dst)) = (src.get(..row_bytes), dst.get_mut(..row_bytes)) {
            dst.copy_from_slice(src);
        }
    }
    target.set_bytes_used(target_format.size as usize);
    target.set_sequence(source.sequence());
    Ok(())
}
