//! Shared types for the loopmix mixdown engine.
//!
//! This crate contains the domain models exchanged between the mixing
//! engine and whatever presentation layer drives it.

pub mod encoding;
pub mod error;
pub mod events;
pub mod output;
pub mod progress;
pub mod state;
pub mod track;

/// Unique identifier for a mix session.
pub type SessionId = uuid::Uuid;

// Re-export commonly used types
pub use error::MixErrorKind;
pub use events::MixEvent;
pub use output::OutputRef;
pub use progress::MixingProgress;
pub use state::ControllerState;
pub use track::{MixTrack, SourceRef, MAX_SPEED, MAX_VOLUME, MIN_SPEED};
