//! Linux fbdev OSD plane driven through its device node and sysfs attributes.
//!
//! Geometry comes from `/sys/class/graphics/fbN`. Frames are written with
//! positional writes into one page of the virtual screen, and the page is
//! shown by writing its offset to the `pan` attribute. Without a working `pan`
//! attribute every frame lands on the first page.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::FramebufferConfig;
use crate::error::{keep_first_error, PipelineError, Result};
use crate::pool::{BufferPool, BufferSlot, SlotState};
use crate::traits::{Close, DisplayDevice, Format, FourCC};

/// Where the kernel exposes framebuffer attributes.
pub const SYSFS_GRAPHICS: &str = "/sys/class/graphics";

/// Framebuffer geometry as reported by sysfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferGeometry {
    /// Virtual width in pixels.
    pub virtual_width: u32,
    /// Virtual height in pixels; pages are stacked vertically.
    pub virtual_height: u32,
    /// Bytes per line.
    pub stride: u32,
    /// Bits per pixel.
    pub bits_per_pixel: u32,
}

impl FramebufferGeometry {
    /// Read `virtual_size`, `stride` and `bits_per_pixel` from `sysfs_dir`.
    pub fn read(sysfs_dir: &Path) -> Result<Self> {
        let (virtual_width, virtual_height) = read_pair(&sysfs_dir.join("virtual_size"))?;
        Ok(Self {
            virtual_width,
            virtual_height,
            stride: read_number(&sysfs_dir.join("stride"))?,
            bits_per_pixel: read_number(&sysfs_dir.join("bits_per_pixel"))?,
        })
    }

    /// Pages of `height` lines that fit in the virtual screen.
    pub const fn pages(&self, height: u32) -> u32 {
        if height == 0 {
            0
        } else {
            self.virtual_height / height
        }
    }
}

fn attribute(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|raw| raw.trim().to_owned())
        .map_err(|err| PipelineError::device(path.display().to_string(), err))
}

fn parse_number(path: &Path, raw: &str) -> Result<u32> {
    raw.trim().parse().map_err(|err| {
        PipelineError::device(path.display().to_string(), format!("bad value {raw:?}: {err}"))
    })
}

fn read_number(path: &Path) -> Result<u32> {
    parse_number(path, &attribute(path)?)
}

fn read_pair(path: &Path) -> Result<(u32, u32)> {
    let raw = attribute(path)?;
    let (first, second) = raw.split_once(',').ok_or_else(|| {
        PipelineError::device(path.display().to_string(), format!("expected \"x,y\", got {raw:?}"))
    })?;
    Ok((parse_number(path, first)?, parse_number(path, second)?))
}

/// fbdev plane rotating through pages of its virtual screen.
#[derive(Debug)]
pub struct FramebufferDisplay {
    path: PathBuf,
    file: Option<File>,
    pan: Option<PathBuf>,
    format: Format,
    pages: u32,
    next_page: u32,
    pool: BufferPool,
}

impl FramebufferDisplay {
    /// Open `config.device`, reading its attributes from `sysfs_dir`.
    pub fn open_with_sysfs(
        config: &FramebufferConfig,
        format: &Format,
        sysfs_dir: &Path,
    ) -> Result<Self> {
        let name = config.device.display().to_string();
        let geometry = FramebufferGeometry::read(sysfs_dir)?;

        let bpp = format.fourcc.bytes_per_pixel().unwrap_or(0);
        if geometry.bits_per_pixel != bpp * 8 || format.fourcc != FourCC::ARGB {
            return Err(PipelineError::configuration(
                &name,
                format!("{} bpp plane cannot show {}", geometry.bits_per_pixel, format.fourcc),
            ));
        }
        let negotiated = Format {
            stride: geometry.stride,
            size: geometry.stride * format.height,
            ..format.clone()
        };
        if geometry.virtual_width < format.width || !format.accepts(&negotiated) {
            return Err(PipelineError::configuration(
                &name,
                format!(
                    "{}x{} plane with stride {} cannot show {}x{}",
                    geometry.virtual_width,
                    geometry.virtual_height,
                    geometry.stride,
                    format.width,
                    format.height
                ),
            ));
        }
        let available = geometry.pages(format.height);
        if available == 0 {
            return Err(PipelineError::configuration(&name, "plane is shorter than one frame"));
        }

        let file = OpenOptions::new()
            .write(true)
            .open(&config.device)
            .map_err(|err| PipelineError::device(&name, err))?;

        let pan = sysfs_dir.join("pan");
        let (pages, pan) = if available > 1 && fs::write(&pan, "0,0").is_ok() {
            (available.min(u32::try_from(config.buffers).unwrap_or(u32::MAX)), Some(pan))
        } else {
            (1, None)
        };

        info!(
            device = %name,
            width = format.width,
            height = format.height,
            stride = geometry.stride,
            pages,
            panning = pan.is_some(),
            "framebuffer opened"
        );
        Ok(Self {
            path: config.device.clone(),
            file: Some(file),
            pan,
            pool: BufferPool::with_dimensions(
                config.buffers,
                negotiated.size as usize,
                negotiated.dimensions(),
            ),
            format: negotiated,
            pages,
            next_page: 0,
        })
    }

    /// Pages actually cycled through on screen.
    pub const fn pages(&self) -> u32 {
        self.pages
    }

    fn show(&mut self, slot: &BufferSlot) -> Result<()> {
        let name = || self.path.display().to_string();
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| PipelineError::device(name(), "closed"))?;

        let page = self.next_page;
        let offset = u64::from(page) * u64::from(self.format.size);
        let len = (self.format.size as usize).min(slot.capacity());
        let frame = slot.data().get(..len).unwrap_or_default();
        file.write_all_at(frame, offset)
            .map_err(|err| PipelineError::device(name(), err))?;

        if let Some(pan) = &self.pan {
            fs::write(pan, format!("0,{}", page * self.format.height))
                .map_err(|err| PipelineError::device(name(), err))?;
        }
        self.next_page = (page + 1) % self.pages;
        Ok(())
    }
}

impl DisplayDevice for FramebufferDisplay {
    type Config = FramebufferConfig;

    fn open(config: &Self::Config, format: &Format) -> Result<Self> {
        let node = config.device.file_name().ok_or_else(|| {
            PipelineError::configuration(config.device.display().to_string(), "not a device node")
        })?;
        let sysfs_dir = Path::new(SYSFS_GRAPHICS).join(node);
        Self::open_with_sysfs(config, format, &sysfs_dir)
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
        let shown = self.show(&slot);
        keep_first_error(shown, self.pool.release(slot))
    }
}

impl Close for FramebufferDisplay {
    fn close(&mut self) -> Result<()> {
        if let Some(pan) = &self.pan {
            fs::write(pan, "0,0")
                .map_err(|err| PipelineError::device(self.path.display().to_string(), err))?;
        }
        if self.file.take().is_some() {
            debug!(device = %self.path.display(), "framebuffer closed");
        }
        Ok(())
    }
}
