//! Error taxonomy for the mixing engine.

use loopmix_types::MixErrorKind;
use thiserror::Error;

/// Errors surfaced by the filter-graph builder, the backends and the controller.
#[derive(Error, Debug)]
pub enum MixError {
    #[error("No tracks provided for mixing")]
    NoTracks,

    #[error("Track {index} is invalid: {reason}")]
    InvalidTrack { index: usize, reason: String },

    #[error("Mixing engine is already loading")]
    AlreadyLoading,

    #[error("A mix session is already running")]
    SessionBusy,

    #[error("Mixing engine failed: {message}")]
    Execution {
        message: String,
        exit_code: Option<i32>,
        /// Best-effort diagnostic text reported by the engine
        diagnostics: Option<String>,
    },

    #[error("Output was not created: {0}")]
    OutputMissing(String),

    #[error("Failed to load mixing engine: {0}")]
    Load(String),

    #[error("Mix session was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, MixError>;

impl From<std::io::Error> for MixError {
    fn from(err: std::io::Error) -> Self {
        Self::io("I/O failure", err)
    }
}

impl MixError {
    /// Execution failure without an exit code or diagnostics.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            exit_code: None,
            diagnostics: None,
        }
    }

    /// Execution failure caused by a filesystem fault while staging or
    /// collecting a session's files.
    pub fn io(context: impl Into<String>, err: std::io::Error) -> Self {
        Self::Execution {
            message: context.into(),
            exit_code: None,
            diagnostics: Some(err.to_string()),
        }
    }

    /// Machine-readable kind of this error.
    pub fn kind(&self) -> MixErrorKind {
        match self {
            Self::NoTracks => MixErrorKind::NoTracks,
            Self::InvalidTrack { .. } => MixErrorKind::InvalidTrack,
            Self::AlreadyLoading => MixErrorKind::AlreadyLoading,
            Self::SessionBusy => MixErrorKind::SessionBusy,
            Self::Execution { .. } => MixErrorKind::Execution,
            Self::OutputMissing(_) => MixErrorKind::OutputMissing,
            Self::Load(_) => MixErrorKind::Load,
            Self::Cancelled => MixErrorKind::Cancelled,
        }
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoTracks => "Please select at least one track to mix",
            Self::InvalidTrack { .. } => "One of the tracks has an unsupported speed or volume",
            Self::AlreadyLoading => "Please wait for the mixing engine to finish loading",
            Self::SessionBusy => "Please wait for the current mix to finish",
            Self::Execution { .. } => "Audio mixing encountered an error",
            Self::OutputMissing(_) => "Mixed audio file not found",
            Self::Load(_) => {
                "The mixing engine could not be initialized. This environment may not support it."
            }
            Self::Cancelled => "Mixing was cancelled",
        }
    }

    /// Diagnostic text attached by the engine, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Execution { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }
}
