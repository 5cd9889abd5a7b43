//! Gapless playback scheduling
//!
//! Model audio arrives in bursts. Each decoded frame starts where the previous
//! one ends, or at the live output clock if playback has fallen behind:
//!
//! ```text
//! start      = max(next_start, clock_now)
//! next_start = start + frame.duration
//! ```
//!
//! The cursor and the set of in-flight units share one lock; completion
//! notifications arrive from the output thread while new frames are being
//! scheduled from the transport thread.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::audio::frame::{AudioFrame, Direction};
use crate::audio::output::{AudioOutput, PlaybackUnit, UnitId};
use crate::error::AudioError;

/// Where a frame landed on the output clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub id: UnitId,
    pub start: Duration,
    pub end: Duration,
}

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub completed: u64,
    pub interruptions: u64,
    pub active: usize,
}

#[derive(Default)]
struct SchedulerState {
    /// `None` until anchored, and again after an interruption
    next_start: Option<Duration>,
    active: HashSet<UnitId>,
    next_id: UnitId,
    shut_down: bool,
    scheduled: u64,
    completed: u64,
    interruptions: u64,
}

pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    state: Arc<Mutex<SchedulerState>>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Pin the cursor to the live output clock
    pub fn anchor(&self) {
        let mut state = self.state.lock();
        state.next_start = Some(self.output.current_clock());
    }

    /// Schedule a decoded frame right after its predecessor.
    ///
    /// Returns `Ok(None)` once the scheduler has been shut down.
    pub fn schedule(&self, frame: AudioFrame) -> Result<Option<Scheduled>, AudioError> {
        if frame.direction() != Direction::Output {
            tracing::warn!("Refusing to play a capture frame");
            return Ok(None);
        }

        let mut state = self.state.lock();
        if state.shut_down {
            return Ok(None);
        }

        let now = self.output.current_clock();
        let start = state.next_start.map_or(now, |next| next.max(now));
        let id = state.next_id;
        let unit = PlaybackUnit { id, start, frame };
        let end = unit.end();

        self.output
            .schedule_buffer(unit, completion_callback(Arc::downgrade(&self.state)))?;

        state.next_id += 1;
        state.active.insert(id);
        state.next_start = Some(end);
        state.scheduled += 1;

        tracing::debug!(unit = id, ?start, ?end, "Scheduled playback unit");
        Ok(Some(Scheduled { id, start, end }))
    }

    /// Drop all queued and playing audio; the next frame re-anchors to the
    /// live clock. Returns how many units were cut off.
    pub fn interrupt(&self) -> usize {
        let mut state = self.state.lock();
        if state.shut_down {
            return 0;
        }
        self.output.stop_all();
        let stopped = state.active.len();
        state.active.clear();
        state.next_start = None;
        state.interruptions += 1;
        stopped
    }

    /// Silence everything and refuse further frames
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        self.output.stop_all();
        state.active.clear();
        state.next_start = None;
    }

    pub fn next_start(&self) -> Option<Duration> {
        self.state.lock().next_start
    }

    pub fn active_units(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        SchedulerStats {
            scheduled: state.scheduled,
            completed: state.completed,
            interruptions: state.interruptions,
            active: state.active.len(),
        }
    }
}

fn completion_callback(state: Weak<Mutex<SchedulerState>>) -> Box<dyn FnOnce(UnitId) + Send> {
    Box::new(move |id| {
        let Some(state) = state.upgrade() else { return };
        let mut state = state.lock();
        // Units stopped by an interruption are already gone
        if state.active.remove(&id) {
            state.completed += 1;
        }
    })
}
