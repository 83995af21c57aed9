//! Cross-platform output directory resolution.
//!
//! Mixed files land in a per-user cache directory by default, or in
//! `./mixes` when running inside a container.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const MIXES_DIR: &str = "mixes";

/// Resolved directories the engine writes to.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    /// Directory mixed files are written to
    pub output_dir: PathBuf,
}

/// Configuration for path resolution.
#[derive(Debug, Default)]
pub struct PathConfig {
    /// Explicit output directory
    pub output_dir: Option<PathBuf>,
}

impl OutputPaths {
    /// Resolve output paths, creating the directory if needed.
    ///
    /// An explicit `output_dir` wins over the platform default.
    pub fn resolve(config: PathConfig) -> anyhow::Result<Self> {
        let output_dir = match config.output_dir {
            Some(dir) => dir,
            None => Self::default_output_dir(),
        };

        if !output_dir.exists() {
            std::fs::create_dir_all(&output_dir)?;
            info!("Created output directory: {}", output_dir.display());
        }

        info!("Mix output directory: {}", output_dir.display());
        Ok(Self { output_dir })
    }

    /// Determine the default output directory based on platform and environment.
    fn default_output_dir() -> PathBuf {
        if Self::is_docker() {
            info!("Docker environment detected, using ./{}/ for output", MIXES_DIR);
            return PathBuf::from(".").join(MIXES_DIR);
        }

        match ProjectDirs::from("", "", "loopmix") {
            Some(proj_dirs) => proj_dirs.cache_dir().join(MIXES_DIR),
            None => {
                warn!(
                    "Could not determine user cache directory, falling back to ./{}/",
                    MIXES_DIR
                );
                PathBuf::from(".").join(MIXES_DIR)
            }
        }
    }

    /// Detect if running inside a Docker container.
    fn is_docker() -> bool {
        if Path::new("/.dockerenv").exists() {
            return true;
        }

        if let Ok(cgroup) = std::fs::read_to_string("/proc/self/cgroup") {
            if cgroup.contains("docker") || cgroup.contains("containerd") {
                return true;
            }
        }

        false
    }
}
