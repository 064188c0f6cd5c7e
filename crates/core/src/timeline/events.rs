use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use super::SchedulerState;

/// Notifications the scheduler publishes to its observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A frame was rendered.
    Tick {
        frame: u64,
        elapsed: f64,
        bpm: f32,
        energy: f32,
        phase: f64,
    },
    /// A transient failure skipped the tick.
    Skipped { failures: u32, error: String },
    StateChanged {
        from: SchedulerState,
        to: SchedulerState,
    },
    Halted { failures: u32, error: String },
}

/// Receives scheduler events on the scheduler's thread. Implementations must
/// return quickly; they run inside the frame budget.
pub trait FrameObserver {
    fn on_event(&mut self, event: &SchedulerEvent);
}

impl<F> FrameObserver for F
where
    F: FnMut(&SchedulerEvent),
{
    fn on_event(&mut self, event: &SchedulerEvent) {
        self(event)
    }
}

/// Forwards events into a bounded channel, dropping them when the receiver
/// falls behind.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: SyncSender<SchedulerEvent>,
    dropped: u64,
}

impl ChannelObserver {
    pub fn bounded(capacity: usize) -> (Self, Receiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        (Self { tx, dropped: 0 }, rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameObserver for ChannelObserver {
    fn on_event(&mut self, event: &SchedulerEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
