//! Core library for the Pulse visualiser.
//!
//! Audio analysis feeds per-frame snapshots into a set of animated layers,
//! which are composited onto a drawing surface once per display refresh.
//! [`SyncScheduler`] ties the pieces together: it owns the
//! [`FeatureExtractor`] and the [`VisualizationEngine`], runs them on a
//! playback clock that stops while paused, and halts after repeated
//! failures instead of spinning on a broken pipeline.

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod config;
pub mod error;
pub mod render;
pub mod scene;
pub mod timeline;

#[cfg(test)]
mod testing;

pub use analysis::{AudioFrame, FeatureExtractor, FeatureVector, Mood, PitchClass};
pub use assets::{AssetStore, BackdropImage, BackdropSource, Rgba};
pub use audio::{AnalyserNode, AudioContext, ContextState, ReadStatus, SampleAnalyser};
pub use config::{AppConfig, VisualConfig, VisualConfigPatch};
pub use error::{PulseVizError, Result};
pub use render::{DrawingSurface, PixelSurface, RenderQuality, VisualizationEngine};
pub use scene::{LayerId, LayerSet, VisualMode, VisualizationState};
pub use timeline::{
    ChannelObserver, FrameObserver, FramePacer, PlaybackClock, SchedulerEvent, SchedulerState,
    SyncScheduler, TickOutcome,
};
