//! Mock devices for testing the workers without hardware.
//!
//! Every mock writes what happens to it into a shared [`EventLog`], so a test
//! can hand the device to a worker and still inspect the call order afterwards.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{keep_first_error, PipelineError, Result};
use crate::pool::{BufferPool, BufferSlot, SlotState};
use crate::traits::{AudioDevice, CaptureDevice, Close, DisplayDevice, Format, FourCC};
use crate::worker::StopFlag;

/// Shared, ordered record of device events.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event.
    pub fn record<S: Into<String>>(&self, event: S) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.into());
    }

    /// Snapshot of every event so far.
    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// How many times `event` was recorded.
    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    /// Index of the first `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

/// Copies of every payload a mock sink accepted.
#[derive(Debug, Clone, Default)]
pub struct FrameSink(Arc<Mutex<Vec<Vec<u8>>>>);

impl FrameSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, frame: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.to_vec());
    }

    /// Snapshot of accepted payloads.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of accepted payloads.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing was accepted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Raise `flag` once `count` operations have happened.
#[derive(Debug, Clone)]
pub struct QuitAfter {
    count: u32,
    flag: StopFlag,
}

impl QuitAfter {
    /// Trigger on the `count`-th operation.
    pub const fn new(count: u32, flag: StopFlag) -> Self {
        Self { count, flag }
    }

    fn check(&self, done: u32) {
        if done >= self.count {
            self.flag.raise();
        }
    }
}

fn scripted(at: Option<u32>, done: u32) -> bool {
    at == Some(done)
}

fn close_event(name: &str, pool: &BufferPool) -> String {
    format!("{name} close {}/{} free", pool.occupancy().free, pool.capacity())
}

/// Configuration of a [`MockCapture`].
#[derive(Debug, Clone)]
pub struct MockCaptureConfig {
    /// Name used as the event prefix.
    pub name: &'static str,
    /// Frame format handed out.
    pub format: Format,
    /// Pool size.
    pub buffers: usize,
    /// Frame contents.
    pub pattern: TestPattern,
    /// Event sink.
    pub log: EventLog,
    /// Fail `open` with a configuration error.
    pub fail_open: bool,
    /// Fail the n-th acquire (1-based) with a device error.
    pub fail_acquire_at: Option<u32>,
    /// Fail the n-th release (1-based) after the slot is back in the pool.
    pub fail_release_at: Option<u32>,
    /// Raise a stop flag after some acquires.
    pub quit_after: Option<QuitAfter>,
}

impl MockCaptureConfig {
    /// Color-bar capture of `format` with three buffers.
    pub fn new(format: Format, log: &EventLog) -> Self {
        Self {
            name: "capture",
            format,
            buffers: 3,
            pattern: TestPattern::ColorBars,
            log: log.clone(),
            fail_open: false,
            fail_acquire_at: None,
            fail_release_at: None,
            quit_after: None,
        }
    }
}

/// In-memory capture device generating UYVY test patterns.
#[derive(Debug)]
pub struct MockCapture {
    config: MockCaptureConfig,
    pool: BufferPool,
    frames: u32,
    released: u32,
}

impl CaptureDevice for MockCapture {
    type Config = MockCaptureConfig;

    fn open(config: &Self::Config) -> Result<Self> {
        config.log.record(format!("{} open", config.name));
        if config.fail_open {
            return Err(PipelineError::configuration(config.name, "mock refused to open"));
        }
        let format = &config.format;
        Ok(Self {
            pool: BufferPool::with_dimensions(
                config.buffers,
                format.size as usize,
                format.dimensions(),
            ),
            config: config.clone(),
            frames: 0,
            released: 0,
        })
    }

    fn format(&self) -> &Format {
        &self.config.format
    }

    fn acquire_buffer(&mut self) -> Result<BufferSlot> {
        self.frames += 1;
        self.config.log.record(format!("{} acquire", self.config.name));
        if let Some(quit) = &self.config.quit_after {
            quit.check(self.frames);
        }
        if scripted(self.config.fail_acquire_at, self.frames) {
            return Err(PipelineError::device(self.config.name, "mock capture fault"));
        }

        let mut slot = self.pool.acquire(SlotState::Producer)?;
        fill_pattern(slot.data_mut(), &self.config.format, self.config.pattern);
        slot.set_bytes_used(self.config.format.size as usize);
        slot.set_sequence(self.frames - 1);
        Ok(slot)
    }

    fn release_buffer(&mut self, slot: BufferSlot) -> Result<()> {
        self.released += 1;
        self.config.log.record(format!("{} release", self.config.name));
        self.pool.release(slot)?;
        if scripted(self.config.fail_release_at, self.released) {
            return Err(PipelineError::device(self.config.name, "mock release fault"));
        }
        Ok(())
    }
}

impl Close for MockCapture {
    fn close(&mut self) -> Result<()> {
        self.config.log.record(close_event(self.config.name, &self.pool));
        Ok(())
    }
}

/// Configuration of a [`MockDisplay`].
#[derive(Debug, Clone)]
pub struct MockDisplayConfig {
    /// Name used as the event prefix.
    pub name: &'static str,
    /// Pool size.
    pub buffers: usize,
    /// Event sink.
    pub log: EventLog,
    /// Copies of submitted frames.
    pub shown: FrameSink,
    /// Pretend the driver negotiated this format instead of the requested one.
    pub substitute: Option<Format>,
    /// Fail `open` with a configuration error.
    pub fail_open: bool,
    /// Fail the n-th acquire (1-based) with a device error.
    pub fail_acquire_at: Option<u32>,
    /// Fail the n-th submit (1-based) with a device error.
    pub fail_submit_at: Option<u32>,
    /// Raise a stop flag after some submits.
    pub quit_after: Option<QuitAfter>,
}

impl MockDisplayConfig {
    /// Double-buffered display.
    pub fn new(log: &EventLog) -> Self {
        Self {
            name: "display",
            buffers: 2,
            log: log.clone(),
            shown: FrameSink::new(),
            substitute: None,
            fail_open: false,
            fail_acquire_at: None,
            fail_submit_at: None,
            quit_after: None,
        }
    }
}

/// In-memory display device keeping a copy of every submitted frame.
#[derive(Debug)]
pub struct MockDisplay {
    config: MockDisplayConfig,
    format: Format,
    pool: BufferPool,
    acquired: u32,
    submitted: u32,
}

impl DisplayDevice for MockDisplay {
    type Config = MockDisplayConfig;

    fn open(config: &Self::Config, format: &Format) -> Result<Self> {
        config.log.record(format!("{} open", config.name));
        if config.fail_open {
            return Err(PipelineError::configuration(config.name, "mock refused to open"));
        }
        let actual = config.substitute.clone().unwrap_or_else(|| format.clone());
        if !format.accepts(&actual) {
            return Err(PipelineError::configuration(
                config.name,
                format!("driver substituted {actual:?} for {format:?}"),
            ));
        }
        Ok(Self {
            pool: BufferPool::with_dimensions(
                config.buffers,
                actual.size as usize,
                actual.dimensions(),
            ),
            config: config.clone(),
            format: actual,
            acquired: 0,
            submitted: 0,
        })
    }

    fn format(&self) -> &Format {
        &self.format
    }

    fn buffer_count(&self) -> usize {
        self.pool.capacity()
    }

    fn acquire_buffer(&mut self) -> Result<BufferSlot> {
        self.acquired += 1;
        self.config.log.record(format!("{} acquire", self.config.name));
        if scripted(self.config.fail_acquire_at, self.acquired) {
            return Err(PipelineError::device(self.config.name, "mock display fault"));
        }
        self.pool.acquire(SlotState::Producer)
    }

    fn submit_buffer(&mut self, slot: BufferSlot) -> Result<()> {
        self.submitted += 1;
        self.config.log.record(format!("{} submit", self.config.name));
        if let Some(quit) = &self.config.quit_after {
            quit.check(self.submitted);
        }
        if scripted(self.config.fail_submit_at, self.submitted) {
            let fault = Err(PipelineError::device(self.config.name, "mock display fault"));
            return keep_first_error(fault, self.pool.release(slot));
        }
        self.config.shown.push(slot.data());
        self.pool.release(slot)
    }
}

impl Close for MockDisplay {
    fn close(&mut self) -> Result<()> {
        self.config.log.record(close_event(self.config.name, &self.pool));
        Ok(())
    }
}

/// Configuration of a [`MockAudio`].
#[derive(Debug, Clone)]
pub struct MockAudioConfig {
    /// Bytes per block.
    pub block_bytes: usize,
    /// Pool size.
    pub buffers: usize,
    /// Rate the mock "negotiates".
    pub sample_rate: u32,
    /// Event sink.
    pub log: EventLog,
    /// Copies of written blocks.
    pub written: FrameSink,
    /// Fail `open` with a configuration error.
    pub fail_open: bool,
    /// Fail the n-th read (1-based) with a device error.
    pub fail_read_at: Option<u32>,
    /// Write attempts (1-based) that underrun.
    pub underrun_writes: Vec<u32>,
    /// Raise a stop flag after some reads.
    pub quit_after: Option<QuitAfter>,
}

impl MockAudioConfig {
    /// 44.1 kHz duplex endpoint moving `block_bytes` at a time.
    pub fn new(block_bytes: usize, log: &EventLog) -> Self {
        Self {
            block_bytes,
            buffers: 2,
            sample_rate: 44_100,
            log: log.clone(),
            written: FrameSink::new(),
            fail_open: false,
            fail_read_at: None,
            underrun_writes: Vec::new(),
            quit_after: None,
        }
    }
}

/// In-memory full-duplex audio endpoint with scriptable underruns.
///
/// Once a write underruns, every further write fails until `prepare`.
#[derive(Debug)]
pub struct MockAudio {
    config: MockAudioConfig,
    pool: BufferPool,
    reads: u32,
    writes: u32,
    xrun: bool,
}

impl AudioDevice for MockAudio {
    type Config = MockAudioConfig;

    fn open(config: &Self::Config) -> Result<Self> {
        config.log.record("sound open");
        if config.fail_open {
            return Err(PipelineError::configuration("sound", "mock refused to open"));
        }
        Ok(Self {
            pool: BufferPool::new(config.buffers, config.block_bytes),
            config: config.clone(),
            reads: 0,
            writes: 0,
            xrun: false,
        })
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn block_bytes(&self) -> usize {
        self.config.block_bytes
    }

    fn acquire_buffer(&mut self) -> Result<BufferSlot> {
        self.reads += 1;
        self.config.log.record("sound read");
        if let Some(quit) = &self.config.quit_after {
            quit.check(self.reads);
        }
        if scripted(self.config.fail_read_at, self.reads) {
            return Err(PipelineError::device("sound", "mock capture fault"));
        }

        let mut slot = self.pool.acquire(SlotState::Producer)?;
        #[allow(clippy::cast_possible_truncation)]
        slot.data_mut().fill(self.reads as u8);
        slot.set_bytes_used(self.config.block_bytes);
        slot.set_sequence(self.reads);
        Ok(slot)
    }

    fn write_buffer(&mut self, slot: &BufferSlot) -> Result<()> {
        self.writes += 1;
        if self.xrun || self.config.underrun_writes.contains(&self.writes) {
            self.xrun = true;
            self.config.log.record("sound underrun");
            return Err(PipelineError::Underrun {
                device: "sound".to_owned(),
            });
        }
        self.config.log.record("sound write");
        self.config.written.push(slot.payload());
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        self.config.log.record("sound prepare");
        self.xrun = false;
        Ok(())
    }

    fn release_buffer(&mut self, slot: BufferSlot) -> Result<()> {
        self.pool.release(slot)
    }
}

impl Close for MockAudio {
    fn close(&mut self) -> Result<()> {
        self.config.log.record("sound close playback");
        self.config.log.record(close_event("sound", &self.pool));
        Ok(())
    }
}

/// SMPTE color bars as (Y, U, V): White, Yellow, Cyan, Green, Magenta, Red, Blue, Black.
const COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

/// Fill a packed 4:2:2 frame (UYVY or YUYV per `format`) with `pattern`.
pub fn fill_pattern(data: &mut [u8], format: &Format, pattern: TestPattern) {
    let width = format.width.max(1);
    let bar_width = (width / 8).max(1);
    let row_bytes = width as usize * 2;
    let stride = (format.stride as usize).max(row_bytes);

    for row in data.chunks_exact_mut(stride).take(format.height as usize) {
        let Some(pixels) = row.get_mut(..row_bytes) else {
            continue;
        };
        for (pair, chunk) in pixels.chunks_exact_mut(4).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let x = pair as u32 * 2;
            let (y, u, v) = match pattern {
                TestPattern::ColorBars => {
                    let bar = ((x / bar_width) as usize).min(COLOR_BARS.len() - 1);
                    COLOR_BARS.get(bar).copied().unwrap_or((16, 128, 128))
                }
                TestPattern::Solid(y, u, v) => (y, u, v),
            };
            let bytes = if format.fourcc == FourCC::YUYV {
                [y, u, y, v]
            } else {
                [u, y, v, y]
            };
            chunk.copy_from_slice(&bytes);
        }
    }
}

/// Allocate and fill one frame of `format`.
pub fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let mut data = vec![0u8; format.size as usize];
    fill_pattern(&mut data, format, pattern);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_bars_uyvy_layout() {
        let format = Format::new(640, 480, FourCC::UYVY);
        let data = generate_test_frame(&format, TestPattern::ColorBars);
        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar is white: U Y V Y.
        assert_eq!(data[..4], [128, 235, 128, 235]);
    }

    #[test]
    fn test_solid_pattern_yuyv() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));
        assert_eq!(data[..4], [128, 64, 128, 192]);
    }

    #[test]
    fn test_mock_capture_sequence_and_release() {
        let log = EventLog::new();
        let config = MockCaptureConfig::new(Format::new(16, 4, FourCC::UYVY), &log);
        let mut capture = MockCapture::open(&config).expect("open");

        let first = capture.acquire_buffer().expect("first frame");
        let second = capture.acquire_buffer().expect("second frame");
        assert_eq!((first.sequence(), second.sequence()), (0, 1));
        capture.release_buffer(first).expect("release first");
        capture.release_buffer(second).expect("release second");
        capture.close().expect("close");

        assert_eq!(log.count("capture acquire"), 2);
        assert!(log.position("capture close 3/3 free").is_some());
    }

    #[test]
    fn test_mock_display_rejects_substitution() {
        let log = EventLog::new();
        let mut config = MockDisplayConfig::new(&log);
        config.substitute = Some(Format::new(320, 240, FourCC::UYVY));
        let err = MockDisplay::open(&config, &Format::new(640, 480, FourCC::UYVY))
            .expect_err("substitution must fail");
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }

    #[test]
    fn test_mock_audio_stays_in_xrun_until_prepare() {
        let log = EventLog::new();
        let mut config = MockAudioConfig::new(8, &log);
        config.underrun_writes = vec![1];
        let mut audio = MockAudio::open(&config).expect("open");

        let block = audio.acquire_buffer().expect("read");
        assert!(audio.write_buffer(&block).is_err());
        assert!(audio.write_buffer(&block).is_err());
        audio.prepare().expect("prepare");
        audio.write_buffer(&block).expect("write after prepare");
        audio.release_buffer(block).expect("release");
        assert_eq!(config.written.frames(), vec![vec![1; 8]]);
    }
}
