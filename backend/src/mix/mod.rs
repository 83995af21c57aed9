//! Pure mix planning: tempo chains, gain curve, filter graph and command line.

pub mod command;
pub mod gain;
pub mod graph;
pub mod tempo;

pub use command::{MixCommand, OutputEncoding};
pub use gain::level_to_gain;
pub use graph::{FilterGraph, TrackChain, OUTPUT_LABEL};
