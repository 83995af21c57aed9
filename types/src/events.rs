//! Events broadcast while sessions run.

use crate::error::MixErrorKind;
use crate::progress::MixingProgress;
use crate::state::ControllerState;
use crate::SessionId;
use serde::{Deserialize, Serialize};

/// Event types that can be broadcast to any number of observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MixEvent {
    /// The controller moved to a new state
    StateChanged { state: ControllerState },
    /// Backend initialisation progress
    LoadProgress { ratio: f64 },
    /// A mix session was started
    SessionStarted {
        session_id: SessionId,
        track_count: usize,
    },
    /// Progress sample for a running session
    Progress {
        session_id: SessionId,
        progress: MixingProgress,
    },
    /// A session produced its output
    SessionCompleted {
        session_id: SessionId,
        /// Human-readable output location
        output: String,
    },
    /// A session failed
    SessionFailed {
        session_id: SessionId,
        kind: MixErrorKind,
        message: String,
    },
    /// A session was cancelled and its staged resources released
    SessionCancelled { session_id: SessionId },
}

impl MixEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            MixEvent::StateChanged { state } => format!("Controller state changed to {}", state),
            MixEvent::LoadProgress { ratio } => {
                format!("Backend loading {:.1}%", ratio * 100.0)
            }
            MixEvent::SessionStarted {
                session_id,
                track_count,
            } => format!("Session {} started with {} tracks", session_id, track_count),
            MixEvent::Progress {
                session_id,
                progress,
            } => format!(
                "Session {} at {}% ({} / {} ms)",
                session_id,
                progress.percent(),
                progress.elapsed_ms,
                progress.estimated_total_ms
            ),
            MixEvent::SessionCompleted { session_id, output } => {
                format!("Session {} completed: {}", session_id, output)
            }
            MixEvent::SessionFailed {
                session_id,
                kind,
                message,
            } => format!("Session {} failed ({}): {}", session_id, kind, message),
            MixEvent::SessionCancelled { session_id } => {
                format!("Session {} cancelled", session_id)
            }
        }
    }

    /// Session this event belongs to, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            MixEvent::SessionStarted { session_id, .. }
            | MixEvent::Progress { session_id, .. }
            | MixEvent::SessionCompleted { session_id, .. }
            | MixEvent::SessionFailed { session_id, .. }
            | MixEvent::SessionCancelled { session_id } => Some(*session_id),
            MixEvent::StateChanged { .. } | MixEvent::LoadProgress { .. } => None,
        }
    }

    /// Whether this event ends a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MixEvent::SessionCompleted { .. }
                | MixEvent::SessionFailed { .. }
                | MixEvent::SessionCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_event_serialization_is_tagged() {
        let session_id = Uuid::new_v4();
        let event = MixEvent::Progress {
            session_id,
            progress: MixingProgress::new(0.5, 1000, 2000),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Progress");
        assert_eq!(json["data"]["progress"]["elapsed_ms"], 1000);
    }

    #[test]
    fn test_terminal_and_session_id() {
        let session_id = Uuid::new_v4();
        let failed = MixEvent::SessionFailed {
            session_id,
            kind: MixErrorKind::Execution,
            message: "boom".to_string(),
        };
        assert!(failed.is_terminal());
        assert_eq!(failed.session_id(), Some(session_id));
        assert!(failed.description().contains("execution"));

        let state = MixEvent::StateChanged {
            state: ControllerState::Ready,
        };
        assert!(!state.is_terminal());
        assert_eq!(state.session_id(), None);
        assert_eq!(state.description(), "Controller state changed to READY");
    }
}
