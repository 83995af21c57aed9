//! Result of a completed mix.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the mixed audio ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputRef {
    /// Written to a file (native backend)
    File { path: PathBuf },
    /// Held in memory (embedded backend)
    Buffer {
        bytes: Vec<u8>,
        mime_type: String,
    },
}

impl OutputRef {
    /// Path of the output file, if the output lives on disk.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path } => Some(path),
            Self::Buffer { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::File { path } => path.display().to_string(),
            Self::Buffer { bytes, mime_type } => {
                format!("{} buffer ({} bytes)", mime_type, bytes.len())
            }
        }
    }
}
