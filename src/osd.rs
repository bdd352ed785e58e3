//! On-screen display: a translucent circular frame plus a scrolling banner.

use std::sync::Arc;

use tracing::{debug, info};

use crate::activation;
use crate::compositor;
use crate::config::OsdConfig;
use crate::error::Result;
use crate::picture::{ImageDecoder, PictureAsset};
use crate::pool::BufferSlot;
use crate::traits::DisplayDevice;
use crate::worker::{ResourceLedger, ThreadEnvironment, Worker};

/// Worker animating the banner on the OSD plane.
pub struct OsdWorker<D: DisplayDevice> {
    display: D::Config,
    settings: OsdConfig,
    decoder: Arc<dyn ImageDecoder>,
    frames: u64,
}

impl<D: DisplayDevice> OsdWorker<D> {
    /// Worker drawing on `display` as described by `settings`.
    pub fn new(display: D::Config, settings: OsdConfig, decoder: Arc<dyn ImageDecoder>) -> Self {
        Self {
            display,
            settings,
            decoder,
            frames: 0,
        }
    }

    /// Scrolled frames submitted so far.
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    fn load_banner(&self) -> Result<PictureAsset> {
        let s = &self.settings;
        let (x, y) = s.picture_origin;
        self.decoder
            .decode(&s.picture, s.picture_width, s.picture_height, s.picture_alpha)
            .map(|picture| picture.with_origin(x, y))
    }

    /// Paint every display page with the mask and the banner at rest.
    fn prime(&self, display: &mut D, banner: &PictureAsset) -> Result<()> {
        let pages = display.buffer_count();
        for page in 0..pages {
            let mut slot = display.acquire_buffer()?;
            let drawn = draw_frame(
                &mut slot,
                banner,
                self.settings.mask_rgb,
                self.settings.mask_alpha,
            );
            mark_full(&mut slot);
            let submitted = display.submit_buffer(slot);
            drawn.and(submitted)?;
            debug!(page, pages, "OSD page primed");
        }
        Ok(())
    }
}

/// Advance a scroll offset by `step`, restarting at zero past `limit`.
pub const fn advance(offset: u32, step: u32, limit: u32) -> u32 {
    let next = offset.saturating_add(step);
    if next >= limit {
        0
    } else {
        next
    }
}

fn draw_frame(
    slot: &mut BufferSlot,
    banner: &PictureAsset,
    mask_rgb: u32,
    mask_alpha: u8,
) -> Result<()> {
    let mut surface = slot.surface_mut();
    compositor::draw_circular_mask(&mut surface, mask_rgb, mask_alpha)?;
    compositor::place(&mut surface, banner)
}

fn mark_full(slot: &mut BufferSlot) {
    let len = slot.capacity();
    slot.set_bytes_used(len);
}

impl<D> Worker for OsdWorker<D>
where
    D: DisplayDevice + 'static,
    D::Config: 'static,
{
    fn name(&self) -> &'static str {
        "osd"
    }

    fn execute(&mut self, env: &ThreadEnvironment, ledger: &ResourceLedger) -> Result<()> {
        activation::run_all(&self.settings.activation);

        let format = self.settings.format();
        let mut display = ledger.acquire("osd display", || D::open(&self.display, &format))?;
        let banner = ledger.acquire("banner", || self.load_banner())?;
        self.prime(&mut display, &banner)?;
        ledger.running();
        info!(
            worker = env.name(),
            pages = display.buffer_count(),
            picture = %self.settings.picture.display(),
            "OSD running"
        );

        let dims = *banner.dimensions();
        let (step_x, step_y) = self.settings.scroll_step;
        let (mut x_offset, mut y_offset) = (0, 0);
        while !env.should_quit() {
            x_offset = advance(x_offset, step_x, dims.width);
            y_offset = advance(y_offset, step_y, dims.height);

            let mut slot = display.acquire_buffer()?;
            let drawn = compositor::scroll(&mut slot.surface_mut(), &banner, x_offset, y_offset);
            mark_full(&mut slot);
            let submitted = display.submit_buffer(slot);
            drawn.and(submitted)?;
            self.frames += 1;
        }

        debug!(worker = env.name(), frames = self.frames, "OSD loop exited");
        ledger.begin_drain();
        Ok(())
    }
}
