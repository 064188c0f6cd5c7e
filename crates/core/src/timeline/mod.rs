//! Playback time, display pacing and the frame scheduler.

pub mod events;
pub mod scheduler;

pub use events::{ChannelObserver, FrameObserver, SchedulerEvent};
pub use scheduler::{ReleasedResources, SchedulerState, SyncScheduler, TickOutcome};

/// Playback time in seconds, excluding the time spent paused.
///
/// Host timestamps (`now`) are monotonic seconds from the frame callback.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlaybackClock {
    accumulated: f64,
    running_since: Option<f64>,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        self.accumulated = 0.0;
        self.running_since = None;
    }

    /// Whether time is currently accumulating.
    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Starts accumulating at `now`; does nothing while already running.
    pub fn start(&mut self, now: f64) {
        if !self.is_running() {
            self.running_since = Some(now);
        }
    }

    pub fn pause(&mut self, now: f64) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += (now - since).max(0.0);
        }
    }

    pub fn elapsed_at(&self, now: f64) -> f64 {
        match self.running_since {
            Some(since) => self.accumulated + (now - since).max(0.0),
            None => self.accumulated,
        }
    }
}

/// Display-refresh pacing for hosts without a native frame callback.
///
/// Slots sit on a fixed grid. When a tick overruns, the slots it missed are
/// dropped and counted instead of being caught up.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: f64,
    last_slot: Option<f64>,
    dropped: u64,
}

impl FramePacer {
    pub fn new(refresh_hz: f64) -> Self {
        let refresh_hz = if refresh_hz.is_finite() && refresh_hz > 0.0 {
            refresh_hz
        } else {
            60.0
        };
        Self {
            interval: 1.0 / refresh_hz,
            last_slot: None,
            dropped: 0,
        }
    }

    /// Seconds between slots.
    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// The next slot strictly after `now`.
    pub fn next_slot(&mut self, now: f64) -> f64 {
        let slot = match self.last_slot {
            None => now + self.interval,
            Some(last) => {
                let candidate = last + self.interval;
                if candidate > now {
                    candidate
                } else {
                    let missed = ((now - candidate) / self.interval).floor() as u64 + 1;
                    self.dropped += missed;
                    tracing::trace!(missed, "frame slots dropped");
                    candidate + missed as f64 * self.interval
                }
            }
        };
        self.last_slot = Some(slot);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_excludes_paused_time() {
        let mut clock = PlaybackClock::default();
        clock.start(10.0);
        assert_eq!(clock.elapsed_at(11.5), 1.5);
        clock.pause(12.0);
        assert_eq!(clock.elapsed_at(30.0), 2.0);
        clock.start(40.0);
        assert_eq!(clock.elapsed_at(41.0), 3.0);
        clock.start(45.0);
        assert_eq!(clock.elapsed_at(41.0), 3.0);
    }

    #[test]
    fn pacer_keeps_a_fixed_grid() {
        let mut pacer = FramePacer::new(10.0);
        assert!((pacer.next_slot(0.0) - 0.1).abs() < 1e-9);
        assert!((pacer.next_slot(0.1) - 0.2).abs() < 1e-9);
        assert!((pacer.next_slot(0.15) - 0.3).abs() < 1e-9);
        assert_eq!(pacer.dropped_frames(), 0);
    }

    #[test]
    fn pacer_drops_missed_slots() {
        let mut pacer = FramePacer::new(10.0);
        pacer.next_slot(0.0);
        let slot = pacer.next_slot(0.45);
        assert!((slot - 0.5).abs() < 1e-9);
        assert_eq!(pacer.dropped_frames(), 3);
    }

    #[test]
    fn invalid_refresh_rates_fall_back_to_60hz() {
        assert!((FramePacer::new(f64::NAN).interval() - 1.0 / 60.0).abs() < 1e-12);
        assert!((FramePacer::new(0.0).interval() - 1.0 / 60.0).abs() < 1e-12);
    }
}
