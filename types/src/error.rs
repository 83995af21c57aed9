//! Machine-readable error kinds.

use serde::{Deserialize, Serialize};

/// Kind of a mixing error, stable across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixErrorKind {
    NoTracks,
    InvalidTrack,
    AlreadyLoading,
    SessionBusy,
    Execution,
    OutputMissing,
    Load,
    Cancelled,
}

impl MixErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoTracks => "no_tracks",
            Self::InvalidTrack => "invalid_track",
            Self::AlreadyLoading => "already_loading",
            Self::SessionBusy => "session_busy",
            Self::Execution => "execution",
            Self::OutputMissing => "output_missing",
            Self::Load => "load",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the caller did something wrong (as opposed to the engine).
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NoTracks | Self::InvalidTrack | Self::AlreadyLoading | Self::SessionBusy
        )
    }
}

impl std::fmt::Display for MixErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
