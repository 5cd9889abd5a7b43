//! Session lifecycle, playback scheduling and orchestration

pub mod controller;
pub mod scheduler;
pub mod state;

pub use controller::{SessionController, SessionStatus};
pub use scheduler::{PlaybackScheduler, Scheduled, SchedulerStats};
pub use state::{SessionEvent, SessionState, StateChange};
