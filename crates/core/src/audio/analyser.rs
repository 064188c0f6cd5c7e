use std::{
    f32::consts::PI,
    fmt,
    sync::{Arc, Mutex, MutexGuard, TryLockError},
};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use super::{AnalyserNode, ReadStatus};
use crate::{config::AnalysisConfig, PulseVizError, Result};

/// Analysis node backed by a ring buffer of decoded samples.
///
/// The audio source pushes mono samples from its own thread; readers get the
/// spectrum of the most recent `fft_size` samples, smoothed over successive
/// reads and mapped onto bytes through the configured decibel range.
pub struct SampleAnalyser {
    sample_rate: u32,
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    state: Mutex<AnalyserState>,
}

struct AnalyserState {
    ring: Vec<f32>,
    write_idx: usize,
    window: Vec<f32>,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    smoothed: Vec<f32>,
}

impl SampleAnalyser {
    pub(crate) fn new(sample_rate: u32, config: &AnalysisConfig) -> Self {
        let fft_size = config.fft_size;
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let state = AnalyserState {
            ring: vec![0.0; fft_size],
            write_idx: 0,
            window: (0..fft_size).map(|i| hann_value(i, fft_size)).collect(),
            input: plan.make_input_vec(),
            spectrum: plan.make_output_vec(),
            scratch: plan.make_scratch_vec(),
            smoothed: vec![0.0; fft_size / 2],
            plan,
        };

        Self {
            sample_rate,
            fft_size,
            smoothing: config.smoothing_time_constant,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
            state: Mutex::new(state),
        }
    }

    /// Feeds mono samples in `[-1, 1]`. Only the newest `fft_size` are kept.
    pub fn push_samples(&self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut state = self.lock()?;
        let cap = state.ring.len();
        let skip = samples.len().saturating_sub(cap);
        for &sample in &samples[skip..] {
            let idx = state.write_idx;
            state.ring[idx] = sample;
            state.write_idx = (idx + 1) % cap;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, AnalyserState>> {
        self.state
            .lock()
            .map_err(|_| PulseVizError::extraction("analyser state has been poisoned"))
    }

    fn try_lock(&self) -> Result<Option<MutexGuard<'_, AnalyserState>>> {
        match self.state.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => Err(PulseVizError::extraction(
                "analyser state has been poisoned",
            )),
        }
    }

    fn byte_from_magnitude(&self, magnitude: f32) -> u8 {
        if magnitude <= 0.0 {
            return 0;
        }
        let db = 20.0 * magnitude.log10();
        let scaled = 255.0 * (db - self.min_decibels) / (self.max_decibels - self.min_decibels);
        scaled.clamp(0.0, 255.0) as u8
    }
}

impl AnalyserState {
    /// Copies the ring oldest-first through the window into the FFT input.
    fn load_window(&mut self) {
        let len = self.ring.len();
        for i in 0..len {
            let sample = self.ring[(self.write_idx + i) % len];
            self.input[i] = sample * self.window[i];
        }
    }
}

impl AnalyserNode for SampleAnalyser {
    fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn decibel_range(&self) -> (f32, f32) {
        (self.min_decibels, self.max_decibels)
    }

    fn byte_frequency_data(&self, out: &mut [u8]) -> Result<ReadStatus> {
        if out.len() != self.frequency_bin_count() {
            return Err(PulseVizError::extraction(format!(
                "frequency buffer holds {} bins, analyser produces {}",
                out.len(),
                self.frequency_bin_count()
            )));
        }
        let Some(mut guard) = self.try_lock()? else {
            return Ok(ReadStatus::Busy);
        };
        let state = &mut *guard;

        state.load_window();
        let plan = Arc::clone(&state.plan);
        plan.process_with_scratch(&mut state.input, &mut state.spectrum, &mut state.scratch)
            .map_err(|err| PulseVizError::extraction(err.to_string()))?;

        let norm = 1.0 / self.fft_size as f32;
        for (i, slot) in out.iter_mut().enumerate() {
            let magnitude = state.spectrum[i].norm() * norm;
            let smoothed = self.smoothing * state.smoothed[i] + (1.0 - self.smoothing) * magnitude;
            state.smoothed[i] = if smoothed.is_finite() { smoothed } else { 0.0 };
            *slot = self.byte_from_magnitude(state.smoothed[i]);
        }
        Ok(ReadStatus::Fresh)
    }

    fn byte_time_domain_data(&self, out: &mut [u8]) -> Result<ReadStatus> {
        if out.len() != self.fft_size {
            return Err(PulseVizError::extraction(format!(
                "time-domain buffer holds {} samples, analyser produces {}",
                out.len(),
                self.fft_size
            )));
        }
        let Some(state) = self.try_lock()? else {
            return Ok(ReadStatus::Busy);
        };
        let len = state.ring.len();
        for (i, slot) in out.iter_mut().enumerate() {
            let sample = state.ring[(state.write_idx + i) % len];
            *slot = (128.0 * (1.0 + sample)).clamp(0.0, 255.0) as u8;
        }
        Ok(ReadStatus::Fresh)
    }
}

impl fmt::Debug for SampleAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleAnalyser")
            .field("sample_rate", &self.sample_rate)
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
