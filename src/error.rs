//! Error taxonomy shared by devices, the compositor and the workers.

use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

/// Error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Requested format, rate or buffer layout is not supported by the device.
    #[error("unsupported configuration on {device}: {message}")]
    Configuration {
        /// Device or subsystem that rejected the configuration.
        device: String,
        /// What was rejected.
        message: String,
    },
    /// I/O fault reported by a device during acquire or submit.
    #[error("device fault on {device}: {message}")]
    Device {
        /// Device that faulted.
        device: String,
        /// Driver-reported detail.
        message: String,
    },
    /// Audio playback ran dry and must be re-armed before the next write.
    #[error("playback underrun on {device}")]
    Underrun {
        /// Audio device that underran.
        device: String,
    },
    /// Picture asset could not be loaded.
    #[error("failed to decode {path}: {reason}")]
    Decode {
        /// File that was being decoded.
        path: PathBuf,
        /// Why decoding failed.
        reason: String,
    },
    /// A copy would write or read outside of a buffer.
    #[error("out of bounds: {0}")]
    Bounds(String),
    /// Every slot of a buffer pool is already held.
    #[error("buffer pool exhausted: all {capacity} slots are held")]
    ResourceExhaustion {
        /// Number of slots in the pool.
        capacity: usize,
    },
    /// A slot was returned to a pool that does not consider it held.
    #[error("slot {index} is not held from this pool")]
    ForeignSlot {
        /// Index carried by the rejected slot.
        index: usize,
    },
    /// A frame does not carry the expected test pattern.
    #[error("frame mismatch: {0}")]
    Mismatch(String),
    /// A worker thread could not be started.
    #[error("failed to launch {worker} worker: {source}")]
    Launch {
        /// Worker name.
        worker: &'static str,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },
    /// I/O error outside of a device call.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Build a [`PipelineError::Configuration`].
    pub fn configuration<D: Into<String>, M: Into<String>>(device: D, message: M) -> Self {
        Self::Configuration {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Build a [`PipelineError::Device`].
    pub fn device<D: Into<String>, M: ToString>(device: D, message: M) -> Self {
        Self::Device {
            device: device.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error is a device fault. Pool exhaustion counts as one.
    pub const fn is_device_fault(&self) -> bool {
        matches!(
            self,
            Self::Device { .. } | Self::ResourceExhaustion { .. } | Self::ForeignSlot { .. }
        )
    }

    /// Whether the error can be recovered locally by the worker that saw it.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Underrun { .. })
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Join an operation's result with the cleanup that ran after it.
///
/// The operation's error is the one returned. A cleanup failure behind it is
/// logged and otherwise dropped.
pub fn keep_first_error<T>(outcome: Result<T>, cleanup: Result<()>) -> Result<T> {
    match (outcome, cleanup) {
        (Err(err), Err(behind)) => {
            warn!(error = %behind, "cleanup after a failed operation also failed");
            Err(err)
        }
        (outcome, cleanup) => outcome.and_then(|value| cleanup.map(|()| value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_is_device_fault() {
        let err = PipelineError::ResourceExhaustion { capacity: 3 };
        assert!(err.is_device_fault());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_only_underrun_is_recoverable() {
        let underrun = PipelineError::Underrun {
            device: "plughw:0,0".to_owned(),
        };
        assert!(underrun.is_recoverable());
        assert!(!PipelineError::Bounds("row 81".to_owned()).is_recoverable());
        assert!(!PipelineError::configuration("capture", "MJPG").is_recoverable());
    }

    #[test]
    fn test_keep_first_error_prefers_the_operation() {
        let failed: Result<()> = Err(PipelineError::device("display", "DQBUF"));
        let cleanup = Err(PipelineError::ForeignSlot { index: 1 });
        let err = keep_first_error(failed, cleanup).expect_err("operation failed");
        assert!(err.to_string().contains("display"));

        let cleanup = Err(PipelineError::ForeignSlot { index: 1 });
        assert!(matches!(
            keep_first_error(Ok(7), cleanup),
            Err(PipelineError::ForeignSlot { index: 1 })
        ));
        assert_eq!(keep_first_error(Ok(7), Ok(())).ok(), Some(7));
    }

    #[test]
    fn test_display_includes_device() {
        let err = PipelineError::device("/dev/video0", "VIDIOC_DQBUF failed");
        assert_eq!(
            err.to_string(),
            "device fault on /dev/video0: VIDIOC_DQBUF failed"
        );
    }
}
