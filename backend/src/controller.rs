//! Mixing session controller.
//!
//! The controller is the single entry point a presentation layer talks to.
//! It owns the backend, enforces the `Idle → Loading → Ready → Mixing`
//! state machine, allows at most one session at a time and turns backend
//! progress samples into [`MixingProgress`] delivered on the caller's task.

use crate::engine::{MixJob, MixingBackend, ProgressEstimator};
use crate::error::{MixError, Result};
use crate::events::EventBroadcaster;
use crate::mix::FilterGraph;
use loopmix_types::{
    ControllerState, MixErrorKind, MixEvent, MixTrack, MixingProgress, OutputRef, SessionId,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Caller-supplied progress handler.
pub type ProgressHandler = Box<dyn FnMut(MixingProgress) + Send>;

/// One mix invocation: the tracks to mix and an optional progress handler.
pub struct MixRequest {
    /// Input order defines the graph input index
    pub tracks: Vec<MixTrack>,
    on_progress: Option<ProgressHandler>,
}

impl MixRequest {
    pub fn new(tracks: Vec<MixTrack>) -> Self {
        Self {
            tracks,
            on_progress: None,
        }
    }

    /// Receive progress samples. The handler runs on the task awaiting
    /// [`MixingController::mix`] and is never called after it returns.
    pub fn on_progress(mut self, handler: impl FnMut(MixingProgress) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(handler));
        self
    }
}

impl fmt::Debug for MixRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixRequest")
            .field("tracks", &self.tracks)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Handle to the mixing engine. Cheap to clone; clones share one session slot.
#[derive(Clone)]
pub struct MixingController {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn MixingBackend>,
    events: EventBroadcaster,
    state: Mutex<ControllerState>,
    active: Mutex<Option<ActiveSession>>,
}

struct ActiveSession {
    id: SessionId,
    token: CancellationToken,
    /// Flips to true once the session's resources are released
    done: watch::Receiver<bool>,
}

impl MixingController {
    pub fn new(backend: Arc<dyn MixingBackend>, events: EventBroadcaster) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                events,
                state: Mutex::new(ControllerState::Idle),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.inner.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.backend.is_ready()
    }

    /// Name of the backend sessions run on.
    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MixEvent> {
        self.inner.events.subscribe()
    }

    /// Initialise the backend.
    ///
    /// A no-op once ready. Fails with [`MixError::AlreadyLoading`] while
    /// another `prepare` is in progress.
    pub async fn prepare(
        &self,
        on_load_progress: Option<&(dyn Fn(f64) + Send + Sync)>,
    ) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state == ControllerState::Loading {
                return Err(MixError::AlreadyLoading);
            }
            if self.inner.backend.is_ready() {
                let became_ready = *state == ControllerState::Idle;
                if became_ready {
                    *state = ControllerState::Ready;
                }
                drop(state);
                if became_ready {
                    self.broadcast_state(ControllerState::Ready);
                }
                debug!("Backend {} already prepared", self.inner.backend.name());
                return Ok(());
            }
            if *state == ControllerState::Mixing {
                return Err(MixError::SessionBusy);
            }
            *state = ControllerState::Loading;
        }
        self.broadcast_state(ControllerState::Loading);

        let mut loading = LoadingGuard {
            controller: self,
            finished: false,
        };

        info!("Preparing {} backend", self.inner.backend.name());
        let result = self.load_backend(on_load_progress).await;
        loading.finished = true;

        match result {
            Ok(()) => {
                info!("Backend {} ready", self.inner.backend.name());
                self.set_state(ControllerState::Ready);
                Ok(())
            }
            Err(e) => {
                error!("Backend {} failed to load: {}", self.inner.backend.name(), e);
                self.set_state(ControllerState::Idle);
                Err(e)
            }
        }
    }

    /// Mix the request's tracks into one output.
    ///
    /// Runs `prepare` first if the backend is not ready yet. Fails with
    /// [`MixError::SessionBusy`] while another session is running and with
    /// [`MixError::Cancelled`] if [`cancel`](Self::cancel) wins the race.
    pub async fn mix(&self, request: MixRequest) -> Result<OutputRef> {
        let MixRequest {
            tracks,
            mut on_progress,
        } = request;

        let graph = FilterGraph::build(&tracks)?;
        let sources = tracks.into_iter().map(|track| track.source).collect();

        let session_id = Uuid::new_v4();
        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        {
            let mut state = self.inner.state.lock();
            if !state.accepts_mix() {
                return Err(match *state {
                    ControllerState::Loading => MixError::AlreadyLoading,
                    _ => MixError::SessionBusy,
                });
            }
            *state = ControllerState::Mixing;
            *self.inner.active.lock() = Some(ActiveSession {
                id: session_id,
                token: token.clone(),
                done: done_rx,
            });
        }
        self.broadcast_state(ControllerState::Mixing);

        let mut session = SessionGuard {
            controller: self,
            session_id,
            done: done_tx,
            outcome: None,
        };

        info!(
            "Session {}: starting mix of {} tracks on {} backend",
            session_id,
            graph.input_count(),
            self.inner.backend.name()
        );
        self.inner.events.broadcast(MixEvent::SessionStarted {
            session_id,
            track_count: graph.input_count(),
        });

        let result = self
            .run_session(
                MixJob {
                    session_id,
                    graph,
                    sources,
                    cancel: token.clone(),
                },
                &mut on_progress,
            )
            .await;

        session.outcome = Some(match &result {
            Ok(output) => SessionOutcome::Completed(output.describe()),
            Err(MixError::Cancelled) => SessionOutcome::Cancelled,
            Err(e) => SessionOutcome::Failed(e.kind(), e.to_string()),
        });
        result
    }

    /// Cancel the running session and wait until its resources are released.
    ///
    /// A no-op when no session is running.
    pub async fn cancel(&self) -> Result<()> {
        let active = self
            .inner
            .active
            .lock()
            .as_ref()
            .map(|active| (active.id, active.token.clone(), active.done.clone()));

        let Some((session_id, token, mut done)) = active else {
            debug!("Cancel requested with no active session");
            return Ok(());
        };

        info!("Session {}: cancelling", session_id);
        token.cancel();
        if let Err(e) = self.inner.backend.cancel(session_id).await {
            warn!("Session {}: backend cancel failed: {}", session_id, e);
        }

        // The guard in `mix` flips this after the backend has released everything.
        let _ = done.wait_for(|released| *released).await;
        debug!("Session {}: cancellation acknowledged", session_id);
        Ok(())
    }

    async fn load_backend(
        &self,
        on_load_progress: Option<&(dyn Fn(f64) + Send + Sync)>,
    ) -> Result<()> {
        let events = &self.inner.events;
        let forward = |ratio: f64| {
            events.broadcast(MixEvent::LoadProgress { ratio });
            if let Some(callback) = on_load_progress {
                callback(ratio);
            }
        };
        self.inner.backend.prepare(Some(&forward)).await
    }

    async fn run_session(
        &self,
        job: MixJob,
        on_progress: &mut Option<ProgressHandler>,
    ) -> Result<OutputRef> {
        let session_id = job.session_id;
        let token = job.cancel.clone();

        if !self.inner.backend.is_ready() {
            debug!("Session {}: backend not ready, preparing", session_id);
            tokio::select! {
                result = self.load_backend(None) => result?,
                _ = token.cancelled() => return Err(MixError::Cancelled),
            }
        }
        if token.is_cancelled() {
            return Err(MixError::Cancelled);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let execution = self.inner.backend.execute(job, tx);
        tokio::pin!(execution);

        let mut estimator = ProgressEstimator::new();
        let result = loop {
            tokio::select! {
                biased;
                result = &mut execution => break result,
                Some(sample) = rx.recv(), if !token.is_cancelled() => {
                    let progress = estimator.observe(sample);
                    self.deliver_progress(session_id, progress, on_progress);
                }
            }
        };

        // Samples queued before the backend returned still belong to the session.
        if !token.is_cancelled() {
            while let Ok(sample) = rx.try_recv() {
                let progress = estimator.observe(sample);
                self.deliver_progress(session_id, progress, on_progress);
            }
        }

        if result.is_ok() && !token.is_cancelled() {
            let progress = MixingProgress::finished(estimator.last_elapsed_ms());
            self.deliver_progress(session_id, progress, on_progress);
        }
        result
    }

    fn deliver_progress(
        &self,
        session_id: SessionId,
        progress: MixingProgress,
        on_progress: &mut Option<ProgressHandler>,
    ) {
        if let Some(handler) = on_progress.as_mut() {
            handler(progress);
        }
        self.inner.events.broadcast(MixEvent::Progress {
            session_id,
            progress,
        });
    }

    fn set_state(&self, next: ControllerState) {
        let changed = {
            let mut state = self.inner.state.lock();
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            self.broadcast_state(next);
        }
    }

    fn broadcast_state(&self, state: ControllerState) {
        debug!("Controller state -> {}", state);
        self.inner.events.broadcast(MixEvent::StateChanged { state });
    }
}

/// Returns the controller to `Idle` if a `prepare` future is dropped mid-load.
struct LoadingGuard<'a> {
    controller: &'a MixingController,
    finished: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Backend preparation abandoned");
            self.controller.set_state(ControllerState::Idle);
        }
    }
}

enum SessionOutcome {
    Completed(String),
    Failed(MixErrorKind, String),
    Cancelled,
}

/// Ends a session on every exit path, including a dropped `mix` future.
struct SessionGuard<'a> {
    controller: &'a MixingController,
    session_id: SessionId,
    done: watch::Sender<bool>,
    outcome: Option<SessionOutcome>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let session_id = self.session_id;
        let (event, next_state) = match self.outcome.take() {
            Some(SessionOutcome::Completed(output)) => {
                info!("Session {}: completed, output {}", session_id, output);
                (
                    MixEvent::SessionCompleted { session_id, output },
                    ControllerState::Idle,
                )
            }
            Some(SessionOutcome::Failed(kind, message)) => {
                error!("Session {}: failed ({}): {}", session_id, kind, message);
                (
                    MixEvent::SessionFailed {
                        session_id,
                        kind,
                        message,
                    },
                    ControllerState::Failed,
                )
            }
            Some(SessionOutcome::Cancelled) => {
                info!("Session {}: cancelled", session_id);
                (MixEvent::SessionCancelled { session_id }, ControllerState::Idle)
            }
            None => {
                warn!("Session {}: abandoned by caller", session_id);
                (MixEvent::SessionCancelled { session_id }, ControllerState::Idle)
            }
        };

        let inner = &self.controller.inner;
        inner.active.lock().take();
        inner.events.broadcast(event);
        self.controller.set_state(next_state);
        self.done.send_replace(true);
    }
}
