//! Track definitions for a mix request.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Slowest supported playback speed.
pub const MIN_SPEED: f64 = 0.05;
/// Fastest supported playback speed.
pub const MAX_SPEED: f64 = 2.50;
/// Highest volume level (unity gain).
pub const MAX_VOLUME: u8 = 100;

/// Where the audio bytes of a track live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    /// A file on durable storage.
    Path { path: PathBuf },
    /// A URI; only `file://` URIs (or bare paths) are addressable.
    Uri { uri: String },
    /// Audio already held in memory.
    Memory {
        bytes: Vec<u8>,
        /// Container extension used when the bytes have to be given a file name
        extension: String,
    },
}

impl SourceRef {
    /// Reference a file on disk.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path { path: path.into() }
    }

    /// Reference a URI.
    pub fn uri(uri: impl Into<String>) -> Self {
        Self::Uri { uri: uri.into() }
    }

    /// Reference in-memory audio.
    pub fn memory(bytes: impl Into<Vec<u8>>, extension: impl Into<String>) -> Self {
        Self::Memory {
            bytes: bytes.into(),
            extension: extension.into(),
        }
    }

    /// Container extension, used to name staged copies.
    ///
    /// Falls back to `mp3` when the reference carries no extension.
    pub fn extension(&self) -> String {
        let from_path = |p: &Path| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
        };
        match self {
            Self::Path { path } => from_path(path),
            Self::Uri { uri } => from_path(Path::new(uri)),
            Self::Memory { extension, .. } if !extension.is_empty() => {
                Some(extension.trim_start_matches('.').to_ascii_lowercase())
            }
            Self::Memory { .. } => None,
        }
        .unwrap_or_else(|| "mp3".to_string())
    }

    /// Short human-readable label for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Path { path } => path.display().to_string(),
            Self::Uri { uri } => uri.clone(),
            Self::Memory { bytes, extension } => {
                format!("<{} bytes of {}>", bytes.len(), extension)
            }
        }
    }
}

/// One input to a mix: a source plus its speed and volume settings.
///
/// Immutable input owned by the caller; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixTrack {
    /// Audio source
    pub source: SourceRef,
    /// Playback speed factor in `[MIN_SPEED, MAX_SPEED]`
    pub speed: f64,
    /// Linear volume level in `[0, MAX_VOLUME]`
    pub volume: u8,
}

impl MixTrack {
    /// Create a track at normal speed and full volume.
    pub fn new(source: SourceRef) -> Self {
        Self {
            source,
            speed: 1.0,
            volume: MAX_VOLUME,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = volume;
        self
    }

    /// Check that speed and volume are inside their supported ranges.
    pub fn check_ranges(&self) -> Result<(), String> {
        if !self.speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&self.speed) {
            return Err(format!(
                "speed {} is outside {:.2}..={:.2}",
                self.speed, MIN_SPEED, MAX_SPEED
            ));
        }
        if self.volume > MAX_VOLUME {
            return Err(format!(
                "volume {} is outside 0..={}",
                self.volume, MAX_VOLUME
            ));
        }
        Ok(())
    }
}
