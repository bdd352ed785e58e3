//! Pipeline configuration: board defaults, environment overrides and validation.

use std::path::PathBuf;
use std::str::FromStr;

use crate::activation::ActivationStep;
use crate::error::{PipelineError, Result};
use crate::traits::{FourCC, Format};

/// Environment variable prefix for every override.
pub const ENV_PREFIX: &str = "AV_PASSTHRU_";

/// Smallest and largest number of slots a pool may have.
pub const BUFFER_COUNT_RANGE: std::ops::RangeInclusive<usize> = 2..=3;

/// V4L2 capture endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Device node.
    pub device: PathBuf,
    /// Requested frame format.
    pub format: Format,
    /// Driver buffers to request.
    pub buffers: usize,
}

/// V4L2 video output endpoint. Its format follows the capture side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayConfig {
    /// Device node.
    pub device: PathBuf,
    /// Driver buffers to request.
    pub buffers: usize,
}

/// Video passthrough worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConfig {
    /// Input side.
    pub capture: CaptureConfig,
    /// Output side.
    pub display: DisplayConfig,
}

/// ALSA full-duplex endpoint and the audio worker's one-shot setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// PCM name for the input side.
    pub capture_pcm: String,
    /// PCM name for the output side.
    pub playback_pcm: String,
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channels.
    pub channels: u32,
    /// Bytes moved per read and per write.
    pub block_bytes: usize,
    /// Blocks in the device pool.
    pub buffers: usize,
    /// Mixer switches flipped before opening the device.
    pub activation: Vec<ActivationStep>,
}

impl AudioConfig {
    /// Bytes per interleaved S16 frame.
    pub const fn frame_bytes(&self) -> usize {
        self.channels as usize * 2
    }
}

/// Framebuffer OSD plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferConfig {
    /// Device node, e.g. `/dev/fb0`.
    pub device: PathBuf,
    /// Pages to rotate through.
    pub buffers: usize,
}

/// OSD worker: plane, banner picture and animation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsdConfig {
    /// Output plane.
    pub framebuffer: FramebufferConfig,
    /// Screen size in pixels.
    pub width: u32,
    /// Screen size in pixels.
    pub height: u32,
    /// Banner bitmap.
    pub picture: PathBuf,
    /// Expected banner width.
    pub picture_width: u32,
    /// Expected banner height.
    pub picture_height: u32,
    /// Alpha baked into every banner pixel.
    pub picture_alpha: u8,
    /// Banner top-left corner on screen.
    pub picture_origin: (u32, u32),
    /// RGB drawn outside the circular mask.
    pub mask_rgb: u32,
    /// Alpha of the mask fill.
    pub mask_alpha: u8,
    /// Scroll advance per frame, in pixels.
    pub scroll_step: (u32, u32),
    /// Steps run before opening the plane.
    pub activation: Vec<ActivationStep>,
}

impl OsdConfig {
    /// Format of one OSD page.
    pub const fn format(&self) -> Format {
        Format::new(self.width, self.height, FourCC::ARGB)
    }
}

/// Everything the three workers need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Video passthrough.
    pub video: VideoConfig,
    /// Audio passthrough.
    pub audio: AudioConfig,
    /// On-screen display.
    pub osd: OsdConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video: VideoConfig {
                capture: CaptureConfig {
                    device: PathBuf::from("/dev/video0"),
                    format: Format::new(640, 480, FourCC::UYVY),
                    buffers: 3,
                },
                display: DisplayConfig {
                    device: PathBuf::from("/dev/video1"),
                    buffers: 2,
                },
            },
            audio: AudioConfig {
                capture_pcm: "default".to_owned(),
                playback_pcm: "default".to_owned(),
                sample_rate: 44_100,
                channels: 2,
                block_bytes: 4096,
                buffers: 2,
                activation: vec![
                    ActivationStep::mixer_switch("Analog Left AUXL Capture Switch"),
                    ActivationStep::mixer_switch("Analog Right AUXR Capture Switch"),
                ],
            },
            osd: OsdConfig {
                framebuffer: FramebufferConfig {
                    device: PathBuf::from("/dev/fb0"),
                    buffers: 2,
                },
                width: 640,
                height: 480,
                picture: PathBuf::from("ti_rgb24_640x80.bmp"),
                picture_width: 640,
                picture_height: 80,
                picture_alpha: 0xFF,
                picture_origin: (0, 400),
                mask_rgb: 0x00_00FF,
                mask_alpha: 0x80,
                scroll_step: (5, 0),
                activation: vec![ActivationStep::sysfs(
                    "/sys/devices/platform/omapdss/manager0/alpha_blending_enabled",
                    "1",
                )],
            },
        }
    }
}

impl PipelineConfig {
    /// Board defaults overridden by `AV_PASSTHRU_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Board defaults overridden through `lookup`, which maps a full variable
    /// name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(path) = var("CAPTURE_DEVICE") {
            config.video.capture.device = path.into();
        }
        if let Some(path) = var("DISPLAY_DEVICE") {
            config.video.display.device = path.into();
        }
        if let Some(count) = parse(&var, "CAPTURE_BUFFERS")? {
            config.video.capture.buffers = count;
        }
        if let Some(count) = parse(&var, "DISPLAY_BUFFERS")? {
            config.video.display.buffers = count;
        }

        if let Some(name) = var("PCM_CAPTURE") {
            config.audio.capture_pcm = name;
        }
        if let Some(name) = var("PCM_PLAYBACK") {
            config.audio.playback_pcm = name;
        }
        if let Some(rate) = parse(&var, "SAMPLE_RATE")? {
            config.audio.sample_rate = rate;
        }
        if let Some(bytes) = parse(&var, "BLOCK_BYTES")? {
            config.audio.block_bytes = bytes;
        }

        if let Some(path) = var("OSD_DEVICE") {
            config.osd.framebuffer.device = path.into();
        }
        if let Some(count) = parse(&var, "OSD_BUFFERS")? {
            config.osd.framebuffer.buffers = count;
        }
        if let Some(path) = var("PICTURE") {
            config.osd.picture = path.into();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("capture", self.video.capture.buffers),
            ("display", self.video.display.buffers),
            ("audio", self.audio.buffers),
            ("osd", self.osd.framebuffer.buffers),
        ];
        for (device, count) in counts {
            if !BUFFER_COUNT_RANGE.contains(&count) {
                return Err(PipelineError::configuration(
                    device,
                    format!("buffer count {count} outside 2..=3"),
                ));
            }
        }

        let format = &self.video.capture.format;
        if format.width == 0 || format.height == 0 {
            return Err(PipelineError::configuration("capture", "zero frame size"));
        }
        if format.fourcc.bytes_per_pixel().is_none() {
            return Err(PipelineError::configuration(
                "capture",
                format!("unsupported pixel format {}", format.fourcc),
            ));
        }

        let audio = &self.audio;
        if audio.sample_rate == 0 || audio.channels == 0 || audio.block_bytes == 0 {
            return Err(PipelineError::configuration(
                "audio",
                "zero rate, channel count or block size",
            ));
        }
        if audio.block_bytes % audio.frame_bytes() != 0 {
            return Err(PipelineError::configuration(
                "audio",
                format!(
                    "block of {} bytes is not a whole number of {}-byte frames",
                    audio.block_bytes,
                    audio.frame_bytes()
                ),
            ));
        }

        let osd = &self.osd;
        if osd.width == 0 || osd.height == 0 || osd.picture_width == 0 || osd.picture_height == 0 {
            return Err(PipelineError::configuration("osd", "zero screen or picture size"));
        }
        let (x, y) = osd.picture_origin;
        if u64::from(x) + u64::from(osd.picture_width) > u64::from(osd.width)
            || u64::from(y) + u64::from(osd.picture_height) > u64::from(osd.height)
        {
            return Err(PipelineError::configuration(
                "osd",
                "picture does not fit on screen at its origin",
            ));
        }
        Ok(())
    }
}

fn parse<T, F>(var: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            raw.trim().parse().map_err(|err: T::Err| {
                PipelineError::configuration(format!("{ENV_PREFIX}{name}"), err.to_string())
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_board() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.video.capture.format, Format::new(640, 480, FourCC::UYVY));
        assert_eq!(config.video.capture.buffers, 3);
        assert_eq!(config.video.display.buffers, 2);
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.audio.block_bytes, 4096);
        assert_eq!(config.osd.picture_origin, (0, 400));
        assert_eq!(config.osd.scroll_step, (5, 0));
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("AV_PASSTHRU_CAPTURE_DEVICE", "/dev/video4"),
            ("AV_PASSTHRU_SAMPLE_RATE", "48000"),
            ("AV_PASSTHRU_OSD_BUFFERS", "3"),
            ("AV_PASSTHRU_PICTURE", "/opt/banner.bmp"),
        ]))
        .expect("valid overrides");

        assert_eq!(config.video.capture.device, PathBuf::from("/dev/video4"));
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.osd.framebuffer.buffers, 3);
        assert_eq!(config.osd.picture, PathBuf::from("/opt/banner.bmp"));
    }

    #[test]
    fn test_unparsable_value_names_variable() {
        let err = PipelineConfig::from_lookup(lookup(&[("AV_PASSTHRU_BLOCK_BYTES", "lots")]))
            .expect_err("not a number");
        assert!(err.to_string().contains("AV_PASSTHRU_BLOCK_BYTES"));
    }

    #[test]
    fn test_validate_rejects_buffer_counts() {
        for bad in ["1", "4"] {
            let result =
                PipelineConfig::from_lookup(lookup(&[("AV_PASSTHRU_DISPLAY_BUFFERS", bad)]));
            assert!(matches!(result, Err(PipelineError::Configuration { .. })));
        }
    }

    #[test]
    fn test_validate_rejects_partial_audio_frame() {
        let mut config = PipelineConfig::default();
        config.audio.block_bytes = 4098;
        assert!(config.validate().is_err());
        config.audio.block_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_offscreen_picture() {
        let mut config = PipelineConfig::default();
        config.osd.picture_origin = (0, 401);
        assert!(config.validate().is_err());
    }
}
