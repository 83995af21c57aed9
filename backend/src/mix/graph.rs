//! Filter graph construction.
//!
//! One chain per input track, each ending in a uniquely labeled stream,
//! followed by a single `amix` merge of all of them:
//!
//! ```text
//! [0:a]volume=1.0[a0];[1:a]atempo=2.0,atempo=1.24,volume=0.0[a1];[a0][a1]amix=inputs=2:duration=longest:normalize=0[out]
//! ```

use super::gain::level_to_gain;
use super::tempo;
use crate::error::{MixError, Result};
use loopmix_types::MixTrack;
use std::fmt;

/// Label of the merged output stream.
pub const OUTPUT_LABEL: &str = "out";

/// Filter chain for a single input track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackChain {
    /// Index of the input stream this chain reads from
    pub input_index: usize,
    /// Tempo factors applied in order (empty for normal speed)
    pub tempo_steps: Vec<f64>,
    /// Gain multiplier applied after the tempo steps
    pub gain: f64,
}

impl TrackChain {
    fn for_track(input_index: usize, track: &MixTrack) -> Self {
        Self {
            input_index,
            tempo_steps: tempo::resolve(track.speed),
            gain: level_to_gain(track.volume),
        }
    }

    /// Label of the intermediate stream this chain produces.
    pub fn label(&self) -> String {
        format!("a{}", self.input_index)
    }
}

impl fmt::Display for TrackChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:a]", self.input_index)?;
        for step in &self.tempo_steps {
            write!(f, "atempo={},", format_number(*step))?;
        }
        write!(f, "volume={}[{}]", format_number(self.gain), self.label())
    }
}

/// Complete filter graph for a mix.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    chains: Vec<TrackChain>,
}

impl FilterGraph {
    /// Build the graph for `tracks`, in input order.
    ///
    /// Fails with [`MixError::NoTracks`] for an empty list and with
    /// [`MixError::InvalidTrack`] when a track's speed or volume is out of range.
    pub fn build(tracks: &[MixTrack]) -> Result<Self> {
        if tracks.is_empty() {
            return Err(MixError::NoTracks);
        }

        let chains = tracks
            .iter()
            .enumerate()
            .map(|(index, track)| {
                track
                    .check_ranges()
                    .map_err(|reason| MixError::InvalidTrack { index, reason })?;
                Ok(TrackChain::for_track(index, track))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { chains })
    }

    pub fn chains(&self) -> &[TrackChain] {
        &self.chains
    }

    pub fn input_count(&self) -> usize {
        self.chains.len()
    }

    pub fn output_label(&self) -> &'static str {
        OUTPUT_LABEL
    }

    /// The `amix` stage merging every chain's output.
    ///
    /// Longest input decides the output duration; normalization is off
    /// because per-track gain is already applied explicitly.
    pub fn merge_stage(&self) -> String {
        let inputs: String = self
            .chains
            .iter()
            .map(|chain| format!("[{}]", chain.label()))
            .collect();
        format!(
            "{}amix=inputs={}:duration=longest:normalize=0[{}]",
            inputs,
            self.chains.len(),
            OUTPUT_LABEL
        )
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chain in &self.chains {
            write!(f, "{};", chain)?;
        }
        f.write_str(&self.merge_stage())
    }
}

/// Build the textual graph and return it with its output label.
pub fn build(tracks: &[MixTrack]) -> Result<(String, String)> {
    let graph = FilterGraph::build(tracks)?;
    Ok((graph.to_string(), graph.output_label().to_string()))
}

/// Shortest representation that still reads as a decimal (`2.0`, `1.24`).
fn format_number(value: f64) -> String {
    format!("{:?}", value)
}
