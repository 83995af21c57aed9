//! Transcoder argument list for a mix.

use super::graph::FilterGraph;
use loopmix_types::encoding::{DEFAULT_AUDIO_CODEC, DEFAULT_BITRATE, DEFAULT_SAMPLE_RATE};
use serde::{Deserialize, Serialize};

/// Fixed output encoding parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEncoding {
    /// Audio codec (`-codec:a`)
    pub codec: String,
    /// Bitrate (`-b:a`), e.g. `128k`
    pub bitrate: String,
    /// Sample rate in Hz (`-ar`)
    pub sample_rate: u32,
}

impl Default for OutputEncoding {
    fn default() -> Self {
        Self {
            codec: DEFAULT_AUDIO_CODEC.to_string(),
            bitrate: DEFAULT_BITRATE.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// A complete mix invocation: inputs, graph, encoding and output target.
#[derive(Debug, Clone)]
pub struct MixCommand<'a> {
    inputs: Vec<String>,
    graph: &'a FilterGraph,
    encoding: &'a OutputEncoding,
    output: String,
}

impl<'a> MixCommand<'a> {
    /// `inputs` must be in graph input order, one per chain.
    pub fn new(
        inputs: Vec<String>,
        graph: &'a FilterGraph,
        encoding: &'a OutputEncoding,
        output: impl Into<String>,
    ) -> Self {
        debug_assert_eq!(inputs.len(), graph.input_count());
        Self {
            inputs,
            graph,
            encoding,
            output: output.into(),
        }
    }

    /// Argument list, output target last.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.inputs.len() * 2 + 14);

        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.clone());
        }

        args.push("-filter_complex".to_string());
        args.push(self.graph.to_string());
        args.push("-map".to_string());
        args.push(format!("[{}]", self.graph.output_label()));

        args.push("-codec:a".to_string());
        args.push(self.encoding.codec.clone());
        args.push("-b:a".to_string());
        args.push(self.encoding.bitrate.clone());
        args.push("-ar".to_string());
        args.push(self.encoding.sample_rate.to_string());
        args.push("-y".to_string());

        args.push(self.output.clone());
        args
    }

    pub fn output(&self) -> &str {
        &self.output
    }
}

impl std::fmt::Display for MixCommand<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.args().join(" "))
    }
}
