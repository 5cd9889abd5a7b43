//! Session lifecycle states

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of one voice session.
///
/// ```text
/// Idle ──start──▶ Connecting ──open──▶ Active ◀──unmute/mute──▶ Muted
///                     │                  │                        │
///                     └──stop/error/close┴────────────────────────┘
///                                        ▼
///                                   Terminating ──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Muted,
    Terminating,
    Closed,
}

/// Events that drive [`SessionState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    Opened,
    Mute,
    Unmute,
    Interrupted,
    /// `stop()`, transport error or close, device loss
    Teardown,
    /// Every resource has been released
    Released,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Muted => "muted",
            SessionState::Terminating => "terminating",
            SessionState::Closed => "closed",
        }
    }

    /// Media is flowing (in at least one direction)
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Muted)
    }

    /// Transition table. `None` means the event is not accepted in this state.
    pub fn next(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Idle, Start) => Some(Connecting),
            (Connecting, Opened) => Some(Active),
            (Active, Mute) | (Muted, Mute) => Some(Muted),
            (Muted, Unmute) | (Active, Unmute) => Some(Active),
            (Active, Interrupted) => Some(Active),
            (Muted, Interrupted) => Some(Muted),
            (Connecting | Active | Muted, Teardown) => Some(Terminating),
            // A failed start releases straight from Connecting
            (Connecting | Terminating, Released) => Some(Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published to subscribers on every transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}
