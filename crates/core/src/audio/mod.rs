//! Host-side audio graph: the context that owns analysis nodes and the
//! [`AnalyserNode`] abstraction the feature extractor reads from.

mod analyser;

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use crate::{config::AnalysisConfig, PulseVizError, Result};

pub use analyser::SampleAnalyser;

/// Read-only view over an analysis node owned by the audio source manager.
///
/// Implementations run their own capture/analysis and hand out byte
/// snapshots. Reads must not block on audio I/O: when the node is busy it
/// reports [`ReadStatus::Busy`] and leaves `out` untouched.
pub trait AnalyserNode: Send + Sync {
    /// FFT window length; the frequency bin count is half of it.
    fn fft_size(&self) -> usize;

    fn frequency_bin_count(&self) -> usize {
        self.fft_size() / 2
    }

    fn sample_rate(&self) -> u32;

    /// `(min, max)` decibel range mapped onto byte values 0..=255.
    fn decibel_range(&self) -> (f32, f32);

    /// Fills `out` (length [`Self::frequency_bin_count`]) with magnitudes.
    fn byte_frequency_data(&self, out: &mut [u8]) -> Result<ReadStatus>;

    /// Fills `out` (length [`Self::fft_size`]) with waveform bytes centred on 128.
    fn byte_time_domain_data(&self, out: &mut [u8]) -> Result<ReadStatus>;
}

/// Outcome of a non-blocking node read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Fresh,
    /// The producer held the node; the caller's buffer still has the previous
    /// snapshot.
    Busy,
}

/// Lifecycle of an [`AudioContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

/// Audio graph handle. Cloning shares the same underlying state.
#[derive(Debug, Clone)]
pub struct AudioContext {
    sample_rate: u32,
    state: Arc<AtomicU8>,
}

impl AudioContext {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Arc::new(AtomicU8::new(encode_state(ContextState::Running))),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> ContextState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    pub fn suspend(&self) {
        if self.state() == ContextState::Running {
            self.state
                .store(encode_state(ContextState::Suspended), Ordering::Release);
        }
    }

    pub fn resume(&self) {
        if self.state() == ContextState::Suspended {
            self.state
                .store(encode_state(ContextState::Running), Ordering::Release);
        }
    }

    pub fn close(&self) {
        self.state
            .store(encode_state(ContextState::Closed), Ordering::Release);
    }

    /// Creates an analysis node fed through [`SampleAnalyser::push_samples`].
    pub fn create_analyser(&self, config: &AnalysisConfig) -> Result<Arc<SampleAnalyser>> {
        if self.state() == ContextState::Closed {
            return Err(PulseVizError::initialization(
                "cannot create an analyser on a closed audio context",
            ));
        }
        if !is_supported_fft_size(config.fft_size) {
            return Err(PulseVizError::initialization(format!(
                "unsupported fft size {}",
                config.fft_size
            )));
        }
        Ok(Arc::new(SampleAnalyser::new(self.sample_rate, config)))
    }
}

/// Power of two within the range analysis nodes support.
pub fn is_supported_fft_size(size: usize) -> bool {
    size.is_power_of_two()
        && (AnalysisConfig::MIN_FFT_SIZE..=AnalysisConfig::MAX_FFT_SIZE).contains(&size)
}

fn encode_state(state: ContextState) -> u8 {
    match state {
        ContextState::Running => 0,
        ContextState::Suspended => 1,
        ContextState::Closed => 2,
    }
}

fn decode_state(raw: u8) -> ContextState {
    match raw {
        0 => ContextState::Running,
        1 => ContextState::Suspended,
        _ => ContextState::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_state_transitions() {
        let ctx = AudioContext::new(48_000);
        assert_eq!(ctx.state(), ContextState::Running);
        ctx.suspend();
        assert_eq!(ctx.clone().state(), ContextState::Suspended);
        ctx.resume();
        assert_eq!(ctx.state(), ContextState::Running);
        ctx.close();
        ctx.resume();
        assert_eq!(ctx.state(), ContextState::Closed);
    }

    #[test]
    fn closed_context_refuses_new_analysers() {
        let ctx = AudioContext::new(48_000);
        ctx.close();
        let err = ctx.create_analyser(&AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, PulseVizError::Initialization(_)));
    }

    #[test]
    fn rejects_unsupported_fft_sizes() {
        let ctx = AudioContext::new(48_000);
        let config = AnalysisConfig {
            fft_size: 1000,
            ..AnalysisConfig::default()
        };
        assert!(ctx.create_analyser(&config).is_err());
        assert!(is_supported_fft_size(2048));
        assert!(!is_supported_fft_size(16));
    }
}
