//! Audio passthrough: line-in blocks written straight to the output.

use tracing::{debug, info, warn};

use crate::activation::{self, ActivationStep};
use crate::error::{keep_first_error, PipelineError, Result};
use crate::pool::BufferSlot;
use crate::realtime::SchedulingClass;
use crate::traits::AudioDevice;
use crate::worker::{ResourceLedger, ThreadEnvironment, Worker};

/// Writes of the first captured block before the loop starts.
const PRIME_WRITES: usize = 2;

/// Worker pumping fixed-size blocks from capture to playback.
pub struct AudioWorker<A: AudioDevice> {
    device: A::Config,
    sample_rate: u32,
    activation: Vec<ActivationStep>,
    blocks: u64,
    underruns: u64,
}

impl<A: AudioDevice> AudioWorker<A> {
    /// Worker opening `device` and expecting `sample_rate`.
    pub const fn new(device: A::Config, sample_rate: u32) -> Self {
        Self {
            device,
            sample_rate,
            activation: Vec::new(),
            blocks: 0,
            underruns: 0,
        }
    }

    /// Steps run once before the device is opened.
    #[must_use]
    pub fn with_activation(mut self, steps: Vec<ActivationStep>) -> Self {
        self.activation = steps;
        self
    }

    /// Blocks passed through in the main loop.
    pub const fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Underruns recovered so far.
    pub const fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Write `block`, re-arming the output as often as it underruns.
    ///
    /// Gives up quietly once `env` asks to quit.
    pub fn write_with_recovery(
        &mut self,
        sound: &mut A,
        block: &BufferSlot,
        env: &ThreadEnvironment,
    ) -> Result<()> {
        loop {
            match sound.write_buffer(block) {
                Err(PipelineError::Underrun { device }) => {
                    self.underruns += 1;
                    warn!(
                        worker = env.name(),
                        %device,
                        underruns = self.underruns,
                        "playback underrun, re-arming"
                    );
                    sound.prepare()?;
                    if env.should_quit() {
                        return Ok(());
                    }
                }
                other => return other,
            }
        }
    }

    fn prime(&mut self, sound: &mut A, env: &ThreadEnvironment) -> Result<()> {
        let block = sound.acquire_buffer()?;
        let written =
            (0..PRIME_WRITES).try_for_each(|_| self.write_with_recovery(sound, &block, env));
        let released = sound.release_buffer(block);
        keep_first_error(written, released)
    }

    fn pump_block(&mut self, sound: &mut A, env: &ThreadEnvironment) -> Result<()> {
        let block = sound.acquire_buffer()?;
        let written = self.write_with_recovery(sound, &block, env);
        let released = sound.release_buffer(block);
        keep_first_error(written, released)
    }
}

impl<A> Worker for AudioWorker<A>
where
    A: AudioDevice + 'static,
    A::Config: 'static,
{
    fn name(&self) -> &'static str {
        "audio"
    }

    fn scheduling(&self) -> SchedulingClass {
        SchedulingClass::RealTime
    }

    fn execute(&mut self, env: &ThreadEnvironment, ledger: &ResourceLedger) -> Result<()> {
        activation::run_all(&self.activation);

        let mut sound = ledger.acquire("sound", || A::open(&self.device))?;
        let effective = sound.sample_rate();
        if effective != self.sample_rate {
            warn!(
                worker = env.name(),
                requested = self.sample_rate,
                effective,
                "sample rate not supported, using nearest"
            );
        }
        ledger.running();
        info!(
            worker = env.name(),
            sample_rate = effective,
            block_bytes = sound.block_bytes(),
            "audio passthrough running"
        );

        self.prime(&mut sound, env)?;
        while !env.should_quit() {
            self.pump_block(&mut sound, env)?;
            self.blocks += 1;
        }

        debug!(
            worker = env.name(),
            blocks = self.blocks,
            underruns = self.underruns,
            "audio loop exited"
        );
        ledger.begin_drain();
        Ok(())
    }
}
