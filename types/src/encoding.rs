//! Default output encoding parameters.
//!
//! Single source of truth shared by the engine and its configuration layer.

/// Lossy audio codec passed to `-codec:a`.
pub const DEFAULT_AUDIO_CODEC: &str = "libmp3lame";
/// Output bitrate passed to `-b:a`.
pub const DEFAULT_BITRATE: &str = "128k";
/// Output sample rate in Hz passed to `-ar`.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
/// File extension of mixed output.
pub const DEFAULT_OUTPUT_EXTENSION: &str = "mp3";
/// MIME type attached to in-memory output buffers.
pub const DEFAULT_OUTPUT_MIME_TYPE: &str = "audio/mpeg";
/// Prefix of generated output file names (`mixed_<timestamp>.<ext>`).
pub const OUTPUT_FILE_PREFIX: &str = "mixed";
