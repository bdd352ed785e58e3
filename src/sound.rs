//! ALSA full-duplex endpoint: interleaved S16_LE blocks in and out.

use alsa::pcm::{Access, Format as SampleFormat, HwParams, State, PCM};
use alsa::{Direction, ValueOr};
use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::error::{keep_first_error, PipelineError, Result};
use crate::pool::{BufferPool, BufferSlot, SlotState};
use crate::traits::{AudioDevice, Close};

const BYTES_PER_SAMPLE: usize = 2;

/// Capture and playback PCMs opened together.
pub struct AlsaDuplex {
    capture: Option<PCM>,
    playback: Option<PCM>,
    sample_rate: u32,
    frame_bytes: usize,
    pool: BufferPool,
    /// Slot index and bytes already played when the last write underran.
    resume: Option<(usize, usize)>,
}

/// Open `name` in `direction` and apply the shared hardware parameters.
///
/// Returns the PCM and the rate the hardware settled on.
fn open_pcm(name: &str, direction: Direction, config: &AudioConfig) -> Result<(PCM, u32)> {
    let label = match direction {
        Direction::Capture => format!("{name} (capture)"),
        Direction::Playback => format!("{name} (playback)"),
    };
    let fail = |err: alsa::Error| PipelineError::device(&label, err);
    let rejected = |err: alsa::Error| rejected_parameter(&label, &err);

    let pcm = PCM::new(name, direction, false).map_err(fail)?;
    let rate = {
        let hwp = HwParams::any(&pcm).map_err(fail)?;
        hwp.set_channels(config.channels).map_err(rejected)?;
        let rate = hwp
            .set_rate_near(config.sample_rate, ValueOr::Nearest)
            .map_err(rejected)?;
        hwp.set_format(SampleFormat::S16LE).map_err(rejected)?;
        hwp.set_access(Access::RWInterleaved).map_err(rejected)?;
        pcm.hw_params(&hwp).map_err(rejected)?;
        rate
    };
    debug!(pcm = %label, rate, "PCM configured");
    Ok((pcm, rate))
}

/// A hardware parameter the PCM refused. EINVAL means the value is unsupported;
/// anything else is a fault of the device itself.
fn rejected_parameter(label: &str, err: &alsa::Error) -> PipelineError {
    if err.errno() == libc::EINVAL {
        PipelineError::configuration(label, err.to_string())
    } else {
        PipelineError::device(label, err)
    }
}

fn is_xrun(err: &alsa::Error) -> bool {
    err.errno() == libc::EPIPE
}

impl AlsaDuplex {
    fn playback(&self) -> Result<&PCM> {
        self.playback
            .as_ref()
            .ok_or_else(|| PipelineError::device("alsa playback", "closed"))
    }
}

impl AudioDevice for AlsaDuplex {
    type Config = AudioConfig;

    fn open(config: &Self::Config) -> Result<Self> {
        let (capture, capture_rate) = open_pcm(&config.capture_pcm, Direction::Capture, config)?;
        let (playback, playback_rate) =
            open_pcm(&config.playback_pcm, Direction::Playback, config)?;
        if capture_rate != playback_rate {
            return Err(PipelineError::configuration(
                "alsa",
                format!("capture runs at {capture_rate} Hz but playback at {playback_rate} Hz"),
            ));
        }

        info!(
            capture = %config.capture_pcm,
            playback = %config.playback_pcm,
            rate = capture_rate,
            channels = config.channels,
            block_bytes = config.block_bytes,
            "sound opened"
        );
        Ok(Self {
            capture: Some(capture),
            playback: Some(playback),
            sample_rate: capture_rate,
            frame_bytes: config.channels as usize * BYTES_PER_SAMPLE,
            pool: BufferPool::new(config.buffers, config.block_bytes),
            resume: None,
        })
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn block_bytes(&self) -> usize {
        self.pool.slot_size()
    }

    fn acquire_buffer(&mut self) -> Result<BufferSlot> {
        let Some(capture) = self.capture.as_ref() else {
            return Err(PipelineError::device("alsa capture", "closed"));
        };
        let mut slot = self.pool.acquire(SlotState::Producer)?;
        match read_block(capture, slot.data_mut(), self.frame_bytes) {
            Ok(len) => {
                slot.set_bytes_used(len);
                Ok(slot)
            }
            Err(err) => keep_first_error(Err(err), self.pool.release(slot)),
        }
    }

    fn write_buffer(&mut self, slot: &BufferSlot) -> Result<()> {
        let Some(pcm) = self.playback.as_ref() else {
            return Err(PipelineError::device("alsa playback", "closed"));
        };
        let mut offset = match self.resume.take() {
            Some((index, played)) if index == slot.index() => played,
            _ => 0,
        };

        let io = pcm.io_bytes();
        let written = write_block(slot.payload(), &mut offset, self.frame_bytes, |chunk| {
            io.writei(chunk).map_err(|err| {
                if is_xrun(&err) || pcm.state() == State::XRun {
                    PipelineError::Underrun {
                        device: "alsa playback".to_owned(),
                    }
                } else {
                    PipelineError::device("alsa playback", err)
                }
            })
        });
        if matches!(written, Err(PipelineError::Underrun { .. })) {
            self.resume = Some((slot.index(), offset));
        }
        written
    }

    fn prepare(&mut self) -> Result<()> {
        self.playback()?
            .prepare()
            .map_err(|err| PipelineError::device("alsa playback", err))
    }

    fn release_buffer(&mut self, slot: BufferSlot) -> Result<()> {
        // A block given up on mid-retry must not leave its offset behind for the next one.
        self.resume = None;
        self.pool.release(slot)
    }
}

/// Read whole frames into `block` until it is full. Returns the bytes read.
fn read_block(pcm: &PCM, block: &mut [u8], frame_bytes: usize) -> Result<usize> {
    let io = pcm.io_bytes();
    let mut filled = 0;
    while filled < block.len() {
        let rest = block.get_mut(filled..).unwrap_or_default();
        let frames = io
            .readi(rest)
            .map_err(|err| PipelineError::device("alsa capture", err))?;
        if frames == 0 {
            break;
        }
        filled += frames * frame_bytes;
    }
    Ok(filled.min(block.len()))
}

/// Feed `block` from `offset` to `writei` until all of it is played.
///
/// `offset` is left at the first unplayed byte when `writei` fails, so a retry
/// after an underrun does not repeat frames that already went out.
fn write_block<W>(
    block: &[u8],
    offset: &mut usize,
    frame_bytes: usize,
    mut writei: W,
) -> Result<()>
where
    W: FnMut(&[u8]) -> Result<usize>,
{
    while let Some(rest) = block.get(*offset..).filter(|rest| !rest.is_empty()) {
        let frames = writei(rest)?;
        if frames == 0 {
            break;
        }
        *offset = (*offset + frames * frame_bytes).min(block.len());
    }
    Ok(())
}

/// A PCM that can be stopped, discarding whatever is still queued.
trait StopPcm {
    fn stop(&self) -> alsa::Result<()>;
}

impl StopPcm for PCM {
    fn stop(&self) -> alsa::Result<()> {
        self.drop()
    }
}

/// Stop playback, then capture. Failures are logged and do not stop the second PCM.
fn stop_in_order<P: StopPcm>(playback: &mut Option<P>, capture: &mut Option<P>) {
    // Playback must stop before capture or the driver can lock up.
    if let Some(playback) = playback.take() {
        if let Err(err) = playback.stop() {
            warn!(error = %err, "dropping queued playback frames failed");
        }
    }
    if let Some(capture) = capture.take() {
        if let Err(err) = capture.stop() {
            warn!(error = %err, "stopping capture failed");
        }
    }
}

impl Close for AlsaDuplex {
    fn close(&mut self) -> Result<()> {
        stop_in_order(&mut self.playback, &mut self.capture);
        self.resume = None;
        debug!(occupancy = ?self.pool.occupancy(), "sound closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorded {
        name: &'static str,
        stopped: Rc<RefCell<Vec<&'static str>>>,
        fails: bool,
    }

    impl StopPcm for Recorded {
        fn stop(&self) -> alsa::Result<()> {
            self.stopped.borrow_mut().push(self.name);
            if self.fails {
                return Err(alsa::Error::new("snd_pcm_drop", libc::EIO));
            }
            Ok(())
        }
    }

    #[test]
    fn test_playback_stops_before_capture() {
        let stopped = Rc::new(RefCell::new(Vec::new()));
        let pcm = |name, fails| Recorded {
            name,
            stopped: Rc::clone(&stopped),
            fails,
        };
        // A failing playback stop must not skip the capture stop.
        let mut playback = Some(pcm("playback", true));
        let mut capture = Some(pcm("capture", false));

        stop_in_order(&mut playback, &mut capture);
        assert_eq!(*stopped.borrow(), ["playback", "capture"]);
        assert!(playback.is_none() && capture.is_none());

        stop_in_order(&mut playback, &mut capture);
        assert_eq!(stopped.borrow().len(), 2);
    }

    #[test]
    fn test_write_resumes_after_underrun_without_replaying() {
        let frame_bytes = 4;
        let block: Vec<u8> = (0..32).collect();
        let mut played = Vec::new();
        let mut calls = 0;
        let mut offset = 0;
        let mut writei = |chunk: &[u8]| {
            calls += 1;
            match calls {
                // Three frames go out, then the device starves.
                1 => {
                    played.extend_from_slice(&chunk[..12]);
                    Ok(3)
                }
                2 => Err(PipelineError::Underrun {
                    device: "alsa playback".to_owned(),
                }),
                _ => {
                    played.extend_from_slice(chunk);
                    Ok(chunk.len() / frame_bytes)
                }
            }
        };

        let first = write_block(&block, &mut offset, frame_bytes, &mut writei);
        assert!(matches!(first, Err(PipelineError::Underrun { .. })));
        assert_eq!(offset, 12);

        write_block(&block, &mut offset, frame_bytes, &mut writei).expect("retry");
        assert_eq!(offset, block.len());
        assert_eq!(played, block);
    }

    #[test]
    fn test_unsupported_parameter_is_configuration_error() {
        let err = rejected_parameter(
            "hw:0,0 (playback)",
            &alsa::Error::new("snd_pcm_hw_params_set_format", libc::EINVAL),
        );
        assert!(matches!(err, PipelineError::Configuration { .. }));
        assert!(!err.is_device_fault());

        let err = rejected_parameter(
            "hw:0,0 (playback)",
            &alsa::Error::new("snd_pcm_hw_params", libc::EIO),
        );
        assert!(err.is_device_fault());
    }

    #[test]
    fn test_missing_pcm_is_device_error() {
        let mut config = PipelineConfig::default().audio;
        config.capture_pcm = "hw:99,99".to_owned();
        let err = AlsaDuplex::open(&config).err().expect("no such card");
        assert!(err.is_device_fault());
        assert!(!err.is_recoverable());
    }
}
