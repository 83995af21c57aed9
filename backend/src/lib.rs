//! loopmix engine library.
//!
//! Flattens several audio tracks, each with its own speed and volume, into a
//! single file by driving an external transcoder. [`mix`] plans the filter
//! graph, [`engine`] runs it natively or inside an embedded interpreter and
//! [`controller::MixingController`] owns sessions, progress and cancellation.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod mix;
pub mod paths;

pub use config::{BackendKind, Config};
pub use controller::{MixRequest, MixingController};
pub use engine::{select_backend, MixingBackend};
pub use error::{MixError, Result};
pub use events::EventBroadcaster;
