//! Execution backends.
//!
//! A backend stages a job's inputs where the transcoder can reach them, runs
//! the transcoder, streams raw progress samples, hands back the output and
//! releases everything it staged. There are two variants behind one trait:
//! [`native::NativeBackend`] spawns the transcoder as a child process and
//! [`vm::VmBackend`] drives an embedded interpreter over a virtual filesystem.

pub mod native;
pub mod progress;
pub mod vm;

pub use native::NativeBackend;
pub use progress::{EngineProgress, ProgressEstimator};
pub use vm::{EmbeddedEngine, VirtualFs, VmBackend};

use crate::config::{BackendKind, Config};
use crate::error::{MixError, Result};
use crate::mix::FilterGraph;
use async_trait::async_trait;
use loopmix_types::{OutputRef, SessionId, SourceRef};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Channel backends push raw progress samples into.
pub type ProgressSender = mpsc::UnboundedSender<EngineProgress>;

/// Load progress callback, ratio in `[0, 1]`.
pub type LoadProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Everything a backend needs to run one session.
#[derive(Debug, Clone)]
pub struct MixJob {
    pub session_id: SessionId,
    pub graph: FilterGraph,
    /// Input sources, in graph input order
    pub sources: Vec<SourceRef>,
    /// Cancelled when the session should stop
    pub cancel: CancellationToken,
}

/// Contract shared by every execution backend.
#[async_trait]
pub trait MixingBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Initialise the backend. Calling it again once ready is a no-op.
    async fn prepare(&self, on_progress: Option<LoadProgressFn<'_>>) -> Result<()>;

    fn is_ready(&self) -> bool;

    /// Run one job to completion.
    ///
    /// Every staged input and any partial output is released before this
    /// returns, whatever the outcome. Resolves to [`MixError::Cancelled`]
    /// when `job.cancel` fires first.
    async fn execute(&self, job: MixJob, progress: ProgressSender) -> Result<OutputRef>;

    /// Signal the running session with this id to stop. Unknown ids are ignored.
    async fn cancel(&self, session_id: SessionId) -> Result<()>;
}

/// Cancellation tokens of the sessions a backend is currently running.
#[derive(Debug, Default, Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, CancellationToken>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a running session until the returned guard is dropped.
    pub fn register(&self, session_id: SessionId, token: CancellationToken) -> SessionRegistration {
        self.sessions.lock().insert(session_id, token);
        SessionRegistration {
            registry: self.clone(),
            session_id,
        }
    }

    /// Cancel a running session. Returns false if it is not running.
    pub fn cancel(&self, session_id: &SessionId) -> bool {
        match self.sessions.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

/// Removes a session from its registry on drop.
pub struct SessionRegistration {
    registry: SessionRegistry,
    session_id: SessionId,
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        self.registry.sessions.lock().remove(&self.session_id);
    }
}

/// Resolve a URI to a filesystem path.
///
/// Accepts `file://` URIs (percent-decoded) and bare paths.
pub(crate) fn uri_to_path(uri: &str) -> std::result::Result<PathBuf, String> {
    if let Some(rest) = uri.strip_prefix("file://") {
        let decoded = urlencoding::decode(rest)
            .map_err(|e| format!("invalid file URI {}: {}", uri, e))?;
        return Ok(PathBuf::from(decoded.into_owned()));
    }
    if uri.contains("://") {
        return Err(format!("unsupported URI scheme in {}", uri));
    }
    Ok(PathBuf::from(uri))
}

/// Pick the backend for this environment once, at startup.
///
/// `auto` prefers the native transcoder when it can be executed and falls
/// back to `embedded` when one is supplied.
pub async fn select_backend(
    config: &Config,
    embedded: Option<Arc<dyn EmbeddedEngine>>,
) -> Result<Arc<dyn MixingBackend>> {
    let embedded_backend = |engine: Arc<dyn EmbeddedEngine>| -> Arc<dyn MixingBackend> {
        Arc::new(VmBackend::from_config(engine, config))
    };

    match config.backend {
        BackendKind::Native => {
            info!("Using native backend ({})", config.ffmpeg_path.display());
            Ok(Arc::new(NativeBackend::from_config(config)))
        }
        BackendKind::Embedded => {
            let engine = embedded.ok_or_else(|| {
                MixError::Load("embedded backend requested but no engine is available".to_string())
            })?;
            info!("Using embedded backend");
            Ok(embedded_backend(engine))
        }
        BackendKind::Auto => match native::probe(&config.ffmpeg_path).await {
            Ok(version) => {
                info!("Using native backend: {}", version);
                Ok(Arc::new(NativeBackend::from_config(config)))
            }
            Err(e) => {
                debug!("Native transcoder unavailable: {}", e);
                match embedded {
                    Some(engine) => {
                        info!("Native transcoder unavailable, using embedded backend");
                        Ok(embedded_backend(engine))
                    }
                    None => {
                        warn!("No usable mixing backend found");
                        Err(e)
                    }
                }
            }
        },
    }
}
