//! av-passthru: live audio and video passthrough with an on-screen display.
//!
//! Three workers run side by side, each on its own thread:
//!
//! - video copies frames from a V4L2 capture node to a V4L2 output node,
//! - audio copies PCM blocks from an ALSA capture device to playback,
//! - the OSD draws a translucent frame and a scrolling banner on an fbdev plane.
//!
//! Devices sit behind the traits in [`traits`] so the workers can be driven by
//! mock devices in tests. The [`coordinator`] starts the workers, stops them
//! together on Ctrl-C or on the first failure, and reports their outcomes.

pub mod activation;
pub mod audio;
pub mod compositor;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod osd;
pub mod picture;
pub mod pool;
pub mod realtime;
pub mod sound;
pub mod traits;
pub mod validation;
pub mod video;
pub mod worker;

#[cfg(test)]
pub mod mock;

pub use audio::AudioWorker;
pub use config::PipelineConfig;
pub use coordinator::{Coordinator, InterruptHandle, PipelineReport};
pub use device::{V4L2Capture, V4L2Display};
pub use error::{PipelineError, Result};
pub use framebuffer::FramebufferDisplay;
pub use osd::OsdWorker;
pub use picture::{BmpDecoder, ImageDecoder, PictureAsset};
pub use sound::AlsaDuplex;
pub use traits::{AudioDevice, CaptureDevice, Close, DisplayDevice, Format, FourCC};
pub use video::VideoWorker;
pub use worker::{ThreadEnvironment, Worker, WorkerOutcome, WorkerPhase};
