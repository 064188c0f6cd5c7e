//! Feature extraction from a bound analysis node.

pub mod features;
pub mod spectral;
pub mod tempo;

use std::{fmt, sync::Arc};

use crate::{
    audio::{is_supported_fft_size, AnalyserNode, AudioContext, ContextState, ReadStatus},
    config::AnalysisConfig,
    PulseVizError, Result,
};

pub use features::{FeatureVector, Mood, PitchClass};
pub use tempo::TempoEstimator;

use features::{DescriptorSample, FeatureHistory};

/// Immutable per-tick snapshot of the audio analysis state.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    frequency_data: Vec<u8>,
    time_domain_data: Vec<u8>,
    bpm: f32,
    energy: f32,
    timestamp: f64,
}

impl AudioFrame {
    pub fn new(
        frequency_data: Vec<u8>,
        time_domain_data: Vec<u8>,
        bpm: f32,
        energy: f32,
        timestamp: f64,
    ) -> Self {
        Self {
            frequency_data,
            time_domain_data,
            bpm,
            energy: energy.clamp(0.0, 1.0),
            timestamp,
        }
    }

    pub fn frequency_data(&self) -> &[u8] {
        &self.frequency_data
    }

    pub fn time_domain_data(&self) -> &[u8] {
        &self.time_domain_data
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// RMS of the waveform in `[0, 1]`.
    pub fn energy(&self) -> f32 {
        self.energy
    }

    /// Seconds on the playback clock.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

struct Binding {
    context: AudioContext,
    node: Arc<dyn AnalyserNode>,
    sample_rate: u32,
    decibel_range: (f32, f32),
}

/// Reads byte snapshots from an analysis node owned elsewhere and derives
/// tempo, energy and descriptor statistics from them.
///
/// The extractor never owns the node's lifecycle: [`FeatureExtractor::disconnect`]
/// only drops its handle. Until a node is bound every getter reports zeroed
/// buffers sized from the configured FFT size.
pub struct FeatureExtractor {
    config: AnalysisConfig,
    binding: Option<Binding>,
    frequency: Vec<u8>,
    time_domain: Vec<u8>,
    tempo: TempoEstimator,
    history: FeatureHistory,
}

impl FeatureExtractor {
    /// Unbound extractor using the sanitised `config`.
    pub fn new(config: AnalysisConfig) -> Self {
        let config = config.sanitized();
        Self {
            frequency: vec![0; config.bin_count()],
            time_domain: vec![0; config.fft_size],
            tempo: TempoEstimator::new(config.tempo.clone()),
            history: FeatureHistory::default(),
            binding: None,
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Binds to `node`, releasing any previous binding first.
    pub fn initialize(
        &mut self,
        context: &AudioContext,
        node: Option<Arc<dyn AnalyserNode>>,
    ) -> Result<()> {
        self.disconnect();

        let node = node.ok_or_else(|| PulseVizError::initialization("no analysis node supplied"))?;
        if context.state() == ContextState::Closed {
            return Err(PulseVizError::initialization("audio context is closed"));
        }
        let fft_size = node.fft_size();
        if !is_supported_fft_size(fft_size) || node.frequency_bin_count() != fft_size / 2 {
            return Err(PulseVizError::initialization(format!(
                "analysis node reports unsupported fft size {fft_size}"
            )));
        }

        self.frequency = vec![0; fft_size / 2];
        self.time_domain = vec![128; fft_size];
        self.binding = Some(Binding {
            context: context.clone(),
            sample_rate: node.sample_rate(),
            decibel_range: node.decibel_range(),
            node,
        });
        tracing::debug!(fft_size, "feature extractor bound");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.binding.is_some()
    }

    pub fn frequency_data(&self) -> &[u8] {
        &self.frequency
    }

    pub fn time_domain_data(&self) -> &[u8] {
        &self.time_domain
    }

    pub fn bpm(&self) -> f32 {
        self.tempo.bpm()
    }

    /// The rolling tempo estimator behind [`FeatureExtractor::bpm`].
    pub fn tempo(&self) -> &TempoEstimator {
        &self.tempo
    }

    /// RMS of the current waveform snapshot, zero while unbound.
    pub fn energy(&self) -> f32 {
        if self.binding.is_none() {
            return 0.0;
        }
        spectral::waveform_rms(&self.time_domain)
    }

    /// Pulls fresh buffers from the node and returns the frame for `timestamp`
    /// (seconds on the playback clock).
    ///
    /// A busy node leaves the previous buffers in place. A suspended context
    /// returns the previous snapshot without feeding the tempo estimator.
    pub fn snapshot(&mut self, timestamp: f64) -> Result<AudioFrame> {
        let binding = self
            .binding
            .as_ref()
            .ok_or_else(|| PulseVizError::initialization("feature extractor is not bound"))?;

        match binding.context.state() {
            ContextState::Closed => {
                return Err(PulseVizError::extraction("audio context closed while bound"));
            }
            ContextState::Suspended => return Ok(self.frame(timestamp)),
            ContextState::Running => {}
        }

        let node = Arc::clone(&binding.node);
        let frequency = node.byte_frequency_data(&mut self.frequency)?;
        let waveform = node.byte_time_domain_data(&mut self.time_domain)?;

        if waveform == ReadStatus::Fresh {
            self.tempo.observe(timestamp, self.energy());
        }
        if frequency == ReadStatus::Fresh && waveform == ReadStatus::Fresh {
            let sample = self.describe();
            self.history.push(sample);
        } else {
            tracing::trace!(timestamp, "analysis node busy, reusing previous snapshot");
        }

        Ok(self.frame(timestamp))
    }

    /// Summary of the recent audio for external consumers. Does not touch
    /// extractor state.
    pub fn extract_features(&self) -> FeatureVector {
        self.history.summarize(self.describe(), self.bpm())
    }

    /// Drops the node binding and reverts to zeroed snapshots. Safe to call
    /// repeatedly.
    pub fn disconnect(&mut self) {
        self.release();
    }

    /// Like [`FeatureExtractor::disconnect`], but hands the node back to the
    /// caller.
    pub fn release(&mut self) -> Option<Arc<dyn AnalyserNode>> {
        let node = self.binding.take().map(|binding| binding.node);
        if node.is_some() {
            tracing::debug!("feature extractor released its analysis node");
        }
        self.frequency = vec![0; self.config.bin_count()];
        self.time_domain = vec![0; self.config.fft_size];
        self.tempo.reset();
        self.history.clear();
        node
    }

    fn frame(&self, timestamp: f64) -> AudioFrame {
        AudioFrame::new(
            self.frequency.clone(),
            self.time_domain.clone(),
            self.bpm(),
            self.energy(),
            timestamp,
        )
    }

    fn describe(&self) -> DescriptorSample {
        let Some(binding) = &self.binding else {
            return DescriptorSample::default();
        };
        let magnitudes = spectral::magnitudes_from_bytes(&self.frequency, binding.decibel_range);
        let sample_rate = binding.sample_rate as f32;
        let bin_hz = sample_rate / self.time_domain.len().max(1) as f32;

        DescriptorSample {
            energy: self.energy(),
            centroid: spectral::spectral_centroid(&magnitudes, bin_hz),
            rolloff: spectral::spectral_rolloff(&magnitudes, bin_hz),
            zcr: spectral::zero_crossing_rate(&self.time_domain),
            mfcc: spectral::mel_cepstrum(&magnitudes, sample_rate),
            chroma: spectral::chroma(&magnitudes, bin_hz),
        }
    }
}

impl fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("fft_size", &self.time_domain.len())
            .field("bound", &self.binding.is_some())
            .field("bpm", &self.bpm())
            .field("history", &self.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedNode;

    fn bound(fft_size: usize) -> (FeatureExtractor, Arc<ScriptedNode>, AudioContext) {
        let ctx = AudioContext::new(48_000);
        let node = ScriptedNode::new(fft_size);
        let mut extractor = FeatureExtractor::new(AnalysisConfig::default());
        extractor
            .initialize(&ctx, Some(node.clone() as Arc<dyn AnalyserNode>))
            .unwrap();
        (extractor, node, ctx)
    }

    #[test]
    fn unbound_getters_report_zeroed_defaults() {
        let extractor = FeatureExtractor::new(AnalysisConfig::default());
        assert!(!extractor.is_initialized());
        assert_eq!(extractor.frequency_data(), &[0u8; 1024][..]);
        assert_eq!(extractor.time_domain_data().len(), 2048);
        assert!(extractor.time_domain_data().iter().all(|&b| b == 0));
        assert_eq!(extractor.bpm(), 120.0);
        assert_eq!(extractor.energy(), 0.0);
    }

    #[test]
    fn initialize_rejects_missing_or_unsupported_nodes() {
        let ctx = AudioContext::new(48_000);
        let mut extractor = FeatureExtractor::new(AnalysisConfig::default());

        let err = extractor.initialize(&ctx, None).unwrap_err();
        assert!(matches!(err, PulseVizError::Initialization(_)));

        let odd = ScriptedNode::new(100);
        let err = extractor.initialize(&ctx, Some(odd as Arc<dyn AnalyserNode>)).unwrap_err();
        assert!(matches!(err, PulseVizError::Initialization(_)));

        ctx.close();
        let err = extractor
            .initialize(&ctx, Some(ScriptedNode::new(256) as Arc<dyn AnalyserNode>))
            .unwrap_err();
        assert!(matches!(err, PulseVizError::Initialization(_)));
        assert!(!extractor.is_initialized());
    }

    #[test]
    fn snapshot_copies_node_buffers() {
        let (mut extractor, node, _ctx) = bound(32);
        node.set_frequency(&[128, 255, 64, 0]);
        node.fill_waveform(255);

        let frame = extractor.snapshot(0.1).unwrap();
        assert_eq!(&frame.frequency_data()[..4], &[128, 255, 64, 0]);
        assert_eq!(frame.frequency_data().len(), 16);
        assert_eq!(frame.time_domain_data(), &[255; 32]);
        assert!((frame.energy() - 127.0 / 128.0).abs() < 1e-6);
        assert_eq!(frame.timestamp(), 0.1);
        assert_eq!(frame.bpm(), 120.0);
    }

    #[test]
    fn busy_node_keeps_the_previous_snapshot() {
        let (mut extractor, node, _ctx) = bound(32);
        node.set_frequency(&[10, 20, 30, 40]);
        extractor.snapshot(0.0).unwrap();

        node.set_frequency(&[0, 0, 0, 0]);
        node.set_busy(true);
        let frame = extractor.snapshot(0.016).unwrap();
        assert_eq!(&frame.frequency_data()[..4], &[10, 20, 30, 40]);
    }

    #[test]
    fn suspended_context_replays_without_feeding_tempo() {
        let (mut extractor, node, ctx) = bound(32);
        node.set_frequency(&[10, 20, 30, 40]);
        extractor.snapshot(0.0).unwrap();

        ctx.suspend();
        node.set_frequency(&[90, 90, 90, 90]);
        let frame = extractor.snapshot(5.0).unwrap();
        assert_eq!(&frame.frequency_data()[..4], &[10, 20, 30, 40]);
        assert_eq!(frame.timestamp(), 5.0);
        assert_eq!(extractor.history.len(), 1);
        assert!(!extractor.tempo().is_warmed_up());

        ctx.resume();
        let frame = extractor.snapshot(1.0).unwrap();
        assert_eq!(&frame.frequency_data()[..4], &[90, 90, 90, 90]);
        assert_eq!(extractor.history.len(), 2);
    }

    #[test]
    fn read_failures_surface_as_extraction_errors() {
        let (mut extractor, node, ctx) = bound(32);
        node.set_failing(true);
        assert!(matches!(extractor.snapshot(0.0), Err(PulseVizError::Extraction(_))));

        node.set_failing(false);
        ctx.close();
        assert!(matches!(extractor.snapshot(0.0), Err(PulseVizError::Extraction(_))));
    }

    #[test]
    fn disconnect_is_idempotent_and_reverts_to_defaults() {
        let (mut extractor, node, _ctx) = bound(64);
        node.fill_waveform(0);
        extractor.snapshot(0.0).unwrap();
        assert!(extractor.energy() > 0.9);

        extractor.disconnect();
        extractor.disconnect();
        assert!(!extractor.is_initialized());
        assert_eq!(extractor.frequency_data().len(), 1024);
        assert_eq!(extractor.energy(), 0.0);
        assert!(extractor.snapshot(0.1).is_err());
    }

    #[test]
    fn reinitialize_rebinds_to_the_new_node() {
        let (mut extractor, _node, ctx) = bound(64);
        let other = ScriptedNode::new(512);
        extractor.initialize(&ctx, Some(other as Arc<dyn AnalyserNode>)).unwrap();
        assert_eq!(extractor.frequency_data().len(), 256);
        assert_eq!(extractor.time_domain_data().len(), 512);
    }

    #[test]
    fn tempo_follows_energy_pulses() {
        let (mut extractor, node, _ctx) = bound(64);
        for n in 0..360 {
            node.fill_waveform(if n % 30 == 0 { 0 } else { 136 });
            extractor.snapshot(n as f64 / 60.0).unwrap();
        }
        let bpm = extractor.bpm();
        assert!((bpm - 120.0).abs() < 1.0, "expected ~120 BPM, got {bpm}");
    }

    #[test]
    fn extracting_features_has_no_side_effects() {
        let (mut extractor, node, _ctx) = bound(2048);
        node.set_frequency(&[200; 64]);
        node.fill_waveform(160);
        for n in 0..10 {
            extractor.snapshot(n as f64 / 60.0).unwrap();
        }

        let first = extractor.extract_features();
        let second = extractor.extract_features();
        assert_eq!(first, second);
        assert_eq!(first.tempo, 120.0);
        assert!(first.energy > 0.2);
        assert!(first.spectral_centroid > 0.0);
        assert!(first.spectral_rolloff > 0.0);
    }
}
