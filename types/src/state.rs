//! Mixing session controller state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a mixing session controller.
///
/// `Idle → Loading → Ready → Mixing → {Idle, Failed}`. `Failed` only ends the
/// session that failed; the controller accepts a new mix afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ControllerState {
    /// Nothing loaded, no session running
    #[default]
    Idle,
    /// Backend initialisation in progress
    Loading,
    /// Backend initialised, no session running
    Ready,
    /// A mix session is in flight
    Mixing,
    /// The last session failed
    Failed,
}

impl ControllerState {
    /// Whether a new mix may be started from this state.
    pub fn accepts_mix(&self) -> bool {
        !matches!(self, Self::Mixing | Self::Loading)
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Loading => write!(f, "LOADING"),
            Self::Ready => write!(f, "READY"),
            Self::Mixing => write!(f, "MIXING"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}
