use std::{fmt, sync::Arc};

use serde::Serialize;

use super::{FrameObserver, PlaybackClock, SchedulerEvent};
use crate::{
    analysis::{AudioFrame, FeatureExtractor},
    audio::{AnalyserNode, AudioContext},
    config::{AppConfig, SchedulerConfig},
    render::{DrawingSurface, VisualizationEngine},
    scene::{LayerId, VisualMode},
    PulseVizError, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Constructed, never started.
    Idle,
    Running,
    Paused,
    /// Crossed the failure threshold or hit a fatal error; needs `reset`.
    Halted,
    /// Resources released by `stop`.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Rendered,
    /// A transient failure was absorbed; the previous frame stays on screen.
    Skipped { failures: u32 },
    /// Playback is not active, nothing was done.
    NotScheduled,
}

/// What `stop` hands back to the caller.
pub struct ReleasedResources {
    pub node: Option<Arc<dyn AnalyserNode>>,
    pub surface: Option<Box<dyn DrawingSurface>>,
}

impl fmt::Debug for ReleasedResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleasedResources")
            .field("node", &self.node.is_some())
            .field("surface", &self.surface.as_ref().map(|s| s.size()))
            .finish()
    }
}

/// Drives extraction and rendering once per display refresh while playback
/// is active.
///
/// The host calls [`SyncScheduler::tick`] from its frame callback with a
/// monotonic timestamp in seconds. Layer animation runs on playback time,
/// so pausing freezes every layer and resuming continues without a jump.
pub struct SyncScheduler {
    config: SchedulerConfig,
    extractor: FeatureExtractor,
    engine: VisualizationEngine,
    clock: PlaybackClock,
    state: SchedulerState,
    failures: u32,
    last_error: Option<String>,
    last_elapsed: Option<f64>,
    frames: u64,
    observers: Vec<Box<dyn FrameObserver>>,
}

impl SyncScheduler {
    /// Builds an idle scheduler from the sanitised `config`. Bind audio and
    /// attach a surface before starting it.
    pub fn new(config: &AppConfig) -> Self {
        let config = config.clone().sanitized();
        let free_bpm = config.analysis.tempo.default_bpm;
        Self::from_parts(
            config.scheduler,
            FeatureExtractor::new(config.analysis),
            VisualizationEngine::new(config.visual, free_bpm),
        )
    }

    /// Assembles a scheduler around an existing extractor and engine.
    pub fn from_parts(
        config: SchedulerConfig,
        extractor: FeatureExtractor,
        engine: VisualizationEngine,
    ) -> Self {
        Self {
            config: config.sanitized(),
            extractor,
            engine,
            clock: PlaybackClock::default(),
            state: SchedulerState::Idle,
            failures: 0,
            last_error: None,
            last_elapsed: None,
            frames: 0,
            observers: Vec::new(),
        }
    }

    /// Binds the extractor to an analysis node.
    pub fn bind_audio(
        &mut self,
        context: &AudioContext,
        node: Option<Arc<dyn AnalyserNode>>,
    ) -> Result<()> {
        self.extractor.initialize(context, node)
    }

    /// Hands `surface` to the engine, returning the one it replaces.
    pub fn attach_surface(
        &mut self,
        surface: Box<dyn DrawingSurface>,
    ) -> Result<Option<Box<dyn DrawingSurface>>> {
        self.engine.attach_surface(surface)
    }

    /// Registers `observer` for every event published from now on.
    pub fn subscribe(&mut self, observer: impl FrameObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// True only while running; paused, halted and stopped schedulers are
    /// not scheduled.
    pub fn is_rendering(&self) -> bool {
        self.state == SchedulerState::Running
    }

    /// Consecutive failed ticks so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Frames rendered since construction.
    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    /// Playback time at host time `now`.
    pub fn elapsed_at(&self, now: f64) -> f64 {
        self.clock.elapsed_at(now)
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn engine(&self) -> &VisualizationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut VisualizationEngine {
        &mut self.engine
    }

    /// Switches the visual mode without interrupting the loop.
    pub fn set_mode(&mut self, mode: VisualMode) {
        self.engine.set_mode(mode);
    }

    pub fn enable_layer(&mut self, layer: LayerId) {
        self.engine.enable_layer(layer);
    }

    pub fn disable_layer(&mut self, layer: LayerId) -> bool {
        self.engine.disable_layer(layer)
    }

    /// Starts playback at host time `now`. Both the analysis node and the
    /// drawing surface must be attached.
    pub fn start(&mut self, now: f64) -> Result<()> {
        match self.state {
            SchedulerState::Running => return Ok(()),
            SchedulerState::Paused => return self.resume(now),
            SchedulerState::Halted => return Err(self.halted_error()),
            SchedulerState::Idle | SchedulerState::Stopped => {}
        }
        if !self.extractor.is_initialized() {
            return Err(PulseVizError::initialization("no analysis node bound"));
        }
        if !self.engine.has_surface() {
            return Err(PulseVizError::initialization("no drawing surface attached"));
        }

        self.clock.reset();
        self.clock.start(now);
        self.engine.reset_layers();
        self.last_elapsed = None;
        self.failures = 0;
        self.last_error = None;
        tracing::info!(mode = ?self.engine.mode(), "rendering started");
        self.transition(SchedulerState::Running);
        Ok(())
    }

    /// Unschedules the loop, leaving all layer and tempo state untouched.
    pub fn pause(&mut self, now: f64) {
        if self.state == SchedulerState::Running {
            self.clock.pause(now);
            tracing::debug!(elapsed = self.clock.elapsed_at(now), "rendering paused");
            self.transition(SchedulerState::Paused);
        }
    }

    /// Continues from where `pause` left off; paused wall time is excluded.
    pub fn resume(&mut self, now: f64) -> Result<()> {
        match self.state {
            SchedulerState::Paused => {
                self.clock.start(now);
                tracing::debug!(elapsed = self.clock.elapsed_at(now), "rendering resumed");
                self.transition(SchedulerState::Running);
                Ok(())
            }
            SchedulerState::Running => Ok(()),
            SchedulerState::Halted => Err(self.halted_error()),
            SchedulerState::Idle | SchedulerState::Stopped => Err(PulseVizError::initialization(
                "cannot resume a scheduler that was never started",
            )),
        }
    }

    /// Unschedules the loop and hands the analysis node and drawing surface
    /// back. Calling it again returns nothing.
    pub fn stop(&mut self) -> ReleasedResources {
        let released = ReleasedResources {
            node: self.extractor.release(),
            surface: self.engine.detach_surface(),
        };
        self.engine.reset_layers();
        self.clock.reset();
        self.last_elapsed = None;
        if self.state != SchedulerState::Stopped {
            tracing::info!(frames = self.frames, "rendering stopped");
            self.transition(SchedulerState::Stopped);
        }
        released
    }

    /// Clears the failure counter. A halted scheduler becomes paused and can
    /// be resumed.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.last_error = None;
        if self.state == SchedulerState::Halted {
            tracing::info!("scheduler reset after halt");
            self.transition(SchedulerState::Paused);
        }
    }

    /// Runs one frame at host time `now`.
    ///
    /// Transient failures skip the frame and are counted; reaching the
    /// configured threshold halts the scheduler and returns
    /// [`PulseVizError::Halted`]. Any other failure halts immediately.
    pub fn tick(&mut self, now: f64) -> Result<TickOutcome> {
        match self.state {
            SchedulerState::Running => {}
            SchedulerState::Halted => return Err(self.halted_error()),
            _ => return Ok(TickOutcome::NotScheduled),
        }

        let elapsed = self.clock.elapsed_at(now);
        let dt = self
            .last_elapsed
            .map_or(0.0, |last| (elapsed - last).clamp(0.0, self.config.max_frame_delta));

        match self.run_frame(elapsed, dt) {
            Ok(frame) => {
                self.failures = 0;
                self.last_error = None;
                self.last_elapsed = Some(elapsed);
                self.frames += 1;
                let event = SchedulerEvent::Tick {
                    frame: self.frames,
                    elapsed,
                    bpm: frame.bpm(),
                    energy: frame.energy(),
                    phase: self.engine.state().gradient.phase(),
                };
                self.publish(&event);
                Ok(TickOutcome::Rendered)
            }
            Err(err) if err.is_transient() => {
                self.failures += 1;
                self.last_error = Some(err.to_string());
                if self.failures >= self.config.failure_threshold {
                    self.halt(now);
                    return Err(self.halted_error());
                }
                tracing::warn!(failures = self.failures, error = %err, "tick skipped");
                self.publish(&SchedulerEvent::Skipped {
                    failures: self.failures,
                    error: err.to_string(),
                });
                Ok(TickOutcome::Skipped {
                    failures: self.failures,
                })
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                self.halt(now);
                Err(err)
            }
        }
    }

    fn run_frame(&mut self, elapsed: f64, dt: f64) -> Result<AudioFrame> {
        let frame = self.extractor.snapshot(elapsed)?;
        self.engine.advance_and_render(&frame, elapsed, dt)?;
        Ok(frame)
    }

    fn halt(&mut self, now: f64) {
        self.clock.pause(now);
        let error = self.last_error.clone().unwrap_or_default();
        tracing::error!(failures = self.failures, %error, "scheduler halted");
        self.transition(SchedulerState::Halted);
        self.publish(&SchedulerEvent::Halted {
            failures: self.failures,
            error,
        });
    }

    fn halted_error(&self) -> PulseVizError {
        PulseVizError::Halted {
            failures: self.failures,
            last: self.last_error.clone().unwrap_or_default(),
        }
    }

    fn transition(&mut self, to: SchedulerState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.publish(&SchedulerEvent::StateChanged { from, to });
    }

    fn publish(&mut self, event: &SchedulerEvent) {
        for observer in &mut self.observers {
            observer.on_event(event);
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if self.state != SchedulerState::Stopped {
            self.stop();
        }
    }
}

impl fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("state", &self.state)
            .field("failures", &self.failures)
            .field("frames", &self.frames)
            .field("extractor", &self.extractor)
            .field("engine", &self.engine)
            .finish()
    }
}
