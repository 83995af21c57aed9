//! In-process backend: drives an embedded transcoder over a virtual filesystem.
//!
//! The embedded interpreter cannot see the host filesystem. Inputs are
//! copied into a [`VirtualFs`] under session-prefixed names, the command runs
//! against those names, and the output is read back as an in-memory buffer.
//! Every entry a session created is unlinked when the session ends.

use super::{uri_to_path, LoadProgressFn, MixJob, MixingBackend, ProgressSender, SessionRegistry};
use crate::config::Config;
use crate::error::{MixError, Result};
use crate::mix::{MixCommand, OutputEncoding};
use async_trait::async_trait;
use loopmix_types::encoding::{DEFAULT_OUTPUT_EXTENSION, DEFAULT_OUTPUT_MIME_TYPE};
use loopmix_types::{OutputRef, SessionId, SourceRef};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// In-memory, engine-private file store.
#[derive(Debug, Default)]
pub struct VirtualFs {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl VirtualFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_file(&self, name: &str, data: Vec<u8>) {
        self.files.lock().insert(name.to_string(), data);
    }

    pub fn read_file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).cloned()
    }

    /// Remove an entry. Returns false if it did not exist.
    pub fn unlink(&self, name: &str) -> bool {
        self.files.lock().remove(name).is_some()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }

    /// Entry names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

/// An interpreter of the transcoder's command language running in-process.
#[async_trait]
pub trait EmbeddedEngine: Send + Sync {
    /// Initialise the interpreter, reporting progress in `[0, 1]`.
    async fn load(&self, on_progress: LoadProgressFn<'_>) -> std::result::Result<(), String>;

    /// Run one command. Input and output names refer to entries in `fs`.
    ///
    /// On failure the error carries the engine's diagnostic text.
    async fn run(
        &self,
        fs: &VirtualFs,
        args: &[String],
        progress: &ProgressSender,
    ) -> std::result::Result<(), String>;

    /// Ask a running command to stop. The `run` future is dropped right after.
    fn abort(&self) {}
}

/// Backend that runs mixes inside an [`EmbeddedEngine`].
pub struct VmBackend {
    engine: Arc<dyn EmbeddedEngine>,
    fs: VirtualFs,
    loaded: AtomicBool,
    encoding: OutputEncoding,
    extension: String,
    mime_type: String,
    sessions: SessionRegistry,
}

impl VmBackend {
    pub fn new(engine: Arc<dyn EmbeddedEngine>, encoding: OutputEncoding) -> Self {
        Self {
            engine,
            fs: VirtualFs::new(),
            loaded: AtomicBool::new(false),
            encoding,
            extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
            mime_type: DEFAULT_OUTPUT_MIME_TYPE.to_string(),
            sessions: SessionRegistry::new(),
        }
    }

    pub fn from_config(engine: Arc<dyn EmbeddedEngine>, config: &Config) -> Self {
        Self {
            extension: config.output_extension.clone(),
            mime_type: config.output_mime_type.clone(),
            ..Self::new(engine, config.encoding.clone())
        }
    }

    /// The virtual filesystem staged entries live in.
    pub fn fs(&self) -> &VirtualFs {
        &self.fs
    }
}

#[async_trait]
impl MixingBackend for VmBackend {
    fn name(&self) -> &'static str {
        "embedded"
    }

    async fn prepare(&self, on_progress: Option<LoadProgressFn<'_>>) -> Result<()> {
        if self.is_ready() {
            debug!("Embedded engine already loaded");
            return Ok(());
        }

        info!("Loading embedded engine...");
        let noop = |_: f64| {};
        let on_progress: LoadProgressFn<'_> = match on_progress {
            Some(f) => f,
            None => &noop,
        };
        self.engine.load(on_progress).await.map_err(|e| {
            error!("Failed to load embedded engine: {}", e);
            MixError::Load(e)
        })?;

        self.loaded.store(true, Ordering::SeqCst);
        info!("Embedded engine loaded");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn execute(&self, job: MixJob, progress: ProgressSender) -> Result<OutputRef> {
        if !self.is_ready() {
            return Err(MixError::Load("embedded engine is not loaded".to_string()));
        }

        let session_id = job.session_id;
        let _registration = self.sessions.register(session_id, job.cancel.clone());
        let mut staged = StagedEntries::new(&self.fs);
        let prefix = session_id.simple().to_string();

        let mut inputs = Vec::with_capacity(job.sources.len());
        for (index, source) in job.sources.iter().enumerate() {
            let name = format!("{}_input{}.{}", prefix, index, source.extension());
            let data = read_source(index, source).await?;
            debug!("Staging {} ({} bytes) from {}", name, data.len(), source.describe());
            staged.write(&name, data);
            inputs.push(name);
        }

        let output_name = format!("{}_output.{}", prefix, self.extension);
        staged.track(&output_name);

        let command = MixCommand::new(inputs, &job.graph, &self.encoding, output_name.clone());
        let args = command.args();
        info!(
            "Session {}: mixing {} tracks in embedded engine",
            session_id,
            job.graph.input_count()
        );
        debug!("Executing: {}", args.join(" "));

        let result = tokio::select! {
            result = self.engine.run(&self.fs, &args, &progress) => result,
            _ = job.cancel.cancelled() => {
                info!("Session {}: aborting embedded engine", session_id);
                self.engine.abort();
                return Err(MixError::Cancelled);
            }
        };

        if let Err(diagnostics) = result {
            error!("Session {}: embedded engine failed: {}", session_id, diagnostics);
            return Err(MixError::Execution {
                message: "embedded engine reported failure".to_string(),
                exit_code: None,
                diagnostics: Some(diagnostics),
            });
        }

        let bytes = self.fs.read_file(&output_name).ok_or_else(|| {
            error!("Session {}: {} missing after success", session_id, output_name);
            MixError::OutputMissing(output_name.clone())
        })?;

        info!(
            "Session {}: mixing complete, output size: {} bytes",
            session_id,
            bytes.len()
        );
        Ok(OutputRef::Buffer {
            bytes,
            mime_type: self.mime_type.clone(),
        })
    }

    async fn cancel(&self, session_id: SessionId) -> Result<()> {
        if !self.sessions.cancel(&session_id) {
            debug!("Cancel requested for inactive session {}", session_id);
        }
        Ok(())
    }
}

/// Load a source's bytes so they can be copied into the virtual filesystem.
async fn read_source(index: usize, source: &SourceRef) -> Result<Vec<u8>> {
    match source {
        SourceRef::Memory { bytes, .. } => Ok(bytes.clone()),
        SourceRef::Path { path } => read_input(index, path).await,
        SourceRef::Uri { uri } => {
            let path = uri_to_path(uri).map_err(|reason| MixError::InvalidTrack { index, reason })?;
            read_input(index, &path).await
        }
    }
}

async fn read_input(index: usize, path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        MixError::io(format!("Failed to read input {} from {}", index, path.display()), e)
    })
}

/// Virtual filesystem entries owned by one session, unlinked on drop.
struct StagedEntries<'a> {
    fs: &'a VirtualFs,
    names: Vec<String>,
}

impl<'a> StagedEntries<'a> {
    fn new(fs: &'a VirtualFs) -> Self {
        Self {
            fs,
            names: Vec::new(),
        }
    }

    fn write(&mut self, name: &str, data: Vec<u8>) {
        self.fs.write_file(name, data);
        self.track(name);
    }

    /// Take ownership of an entry the engine is expected to create.
    fn track(&mut self, name: &str) {
        self.names.push(name.to_string());
    }
}

impl Drop for StagedEntries<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            if !self.fs.unlink(name) && !name.contains("_output.") {
                warn!("Staged entry {} was already gone", name);
            }
        }
        debug!("Released {} staged entries", self.names.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineProgress;
    use crate::mix::FilterGraph;
    use loopmix_types::{MixErrorKind, MixTrack};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    #[derive(Clone, Copy, PartialEq)]
    enum Behaviour {
        Succeed,
        Fail,
        SkipOutput,
        Hang,
    }

    struct FakeEngine {
        behaviour: Behaviour,
        fail_load: bool,
        seen_args: Mutex<Vec<String>>,
        inputs_present: AtomicBool,
        aborts: AtomicUsize,
    }

    impl FakeEngine {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                fail_load: false,
                seen_args: Mutex::new(Vec::new()),
                inputs_present: AtomicBool::new(false),
                aborts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EmbeddedEngine for FakeEngine {
        async fn load(&self, on_progress: LoadProgressFn<'_>) -> std::result::Result<(), String> {
            if self.fail_load {
                return Err("WebAssembly not supported".to_string());
            }
            on_progress(0.5);
            on_progress(1.0);
            Ok(())
        }

        async fn run(
            &self,
            fs: &VirtualFs,
            args: &[String],
            progress: &ProgressSender,
        ) -> std::result::Result<(), String> {
            *self.seen_args.lock() = args.to_vec();
            let inputs: Vec<&String> = args
                .iter()
                .zip(args.iter().skip(1))
                .filter(|(flag, _)| flag.as_str() == "-i")
                .map(|(_, name)| name)
                .collect();
            self.inputs_present
                .store(inputs.iter().all(|name| fs.exists(name)), Ordering::SeqCst);

            let _ = progress.send(EngineProgress::Ratio {
                ratio: 0.5,
                elapsed_ms: 1000,
            });

            match self.behaviour {
                Behaviour::Succeed => {
                    let output = args.last().cloned().unwrap_or_default();
                    fs.write_file(&output, b"mixed".to_vec());
                    Ok(())
                }
                Behaviour::Fail => Err("Invalid argument".to_string()),
                Behaviour::SkipOutput => Ok(()),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            }
        }

        fn abort(&self) {
            self.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn job(sources: Vec<SourceRef>) -> MixJob {
        let tracks: Vec<MixTrack> = sources.iter().cloned().map(MixTrack::new).collect();
        MixJob {
            session_id: Uuid::new_v4(),
            graph: FilterGraph::build(&tracks).unwrap(),
            sources,
            cancel: CancellationToken::new(),
        }
    }

    async fn loaded_backend(engine: Arc<FakeEngine>) -> VmBackend {
        let backend = VmBackend::new(engine, OutputEncoding::default());
        backend.prepare(None).await.unwrap();
        backend
    }

    #[test]
    fn test_virtual_fs_operations() {
        let fs = VirtualFs::new();
        assert!(fs.is_empty());
        fs.write_file("b", vec![2]);
        fs.write_file("a", vec![1]);
        assert_eq!(fs.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(fs.read_file("a"), Some(vec![1]));
        assert!(fs.unlink("a"));
        assert!(!fs.unlink("a"));
        assert_eq!(fs.len(), 1);
    }

    #[tokio::test]
    async fn test_prepare_reports_progress() {
        let engine = FakeEngine::new(Behaviour::Succeed);
        let backend = VmBackend::new(engine, OutputEncoding::default());
        assert!(!backend.is_ready());

        let seen = Mutex::new(Vec::new());
        let on_progress = |ratio: f64| seen.lock().push(ratio);
        backend.prepare(Some(&on_progress)).await.unwrap();

        assert!(backend.is_ready());
        assert_eq!(*seen.lock(), vec![0.5, 1.0]);
    }

    #[tokio::test]
    async fn test_prepare_failure_is_load_error() {
        let engine = Arc::new(FakeEngine {
            behaviour: Behaviour::Succeed,
            fail_load: true,
            seen_args: Mutex::new(Vec::new()),
            inputs_present: AtomicBool::new(false),
            aborts: AtomicUsize::new(0),
        });
        let backend = VmBackend::new(engine, OutputEncoding::default());
        let err = backend.prepare(None).await.unwrap_err();
        assert!(matches!(err, MixError::Load(_)));
        assert!(!backend.is_ready());
    }

    #[tokio::test]
    async fn test_execute_returns_buffer_and_cleans_up() {
        let engine = FakeEngine::new(Behaviour::Succeed);
        let backend = loaded_backend(engine.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let output = backend
            .execute(
                job(vec![
                    SourceRef::memory(vec![1, 2, 3], "mp3"),
                    SourceRef::memory(vec![4, 5], "wav"),
                ]),
                tx,
            )
            .await
            .unwrap();

        assert_eq!(
            output,
            OutputRef::Buffer {
                bytes: b"mixed".to_vec(),
                mime_type: "audio/mpeg".to_string(),
            }
        );
        assert!(engine.inputs_present.load(Ordering::SeqCst));
        assert!(backend.fs().is_empty());
        assert_eq!(
            rx.recv().await,
            Some(EngineProgress::Ratio {
                ratio: 0.5,
                elapsed_ms: 1000
            })
        );

        let args = engine.seen_args.lock().clone();
        assert!(args[1].ends_with("_input0.mp3"));
        assert!(args[3].ends_with("_input1.wav"));
        assert!(args.contains(&"-filter_complex".to_string()));
    }

    #[tokio::test]
    async fn test_execute_reads_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.mp3");
        std::fs::write(&path, b"audio").unwrap();

        let engine = FakeEngine::new(Behaviour::Succeed);
        let backend = loaded_backend(engine.clone()).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        backend
            .execute(job(vec![SourceRef::path(&path)]), tx)
            .await
            .unwrap();
        assert!(engine.inputs_present.load(Ordering::SeqCst));
        assert!(backend.fs().is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_cleans_up() {
        let backend = loaded_backend(FakeEngine::new(Behaviour::Fail)).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = backend
            .execute(job(vec![SourceRef::memory(vec![1], "mp3")]), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, MixError::Execution { .. }));
        assert_eq!(err.diagnostics(), Some("Invalid argument"));
        assert!(backend.fs().is_empty());
    }

    #[tokio::test]
    async fn test_missing_output_is_reported() {
        let backend = loaded_backend(FakeEngine::new(Behaviour::SkipOutput)).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = backend
            .execute(job(vec![SourceRef::memory(vec![1], "mp3")]), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, MixError::OutputMissing(_)));
        assert!(backend.fs().is_empty());
    }

    #[tokio::test]
    async fn test_missing_input_file_cleans_up() {
        let backend = loaded_backend(FakeEngine::new(Behaviour::Succeed)).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = backend
            .execute(
                job(vec![
                    SourceRef::memory(vec![1], "mp3"),
                    SourceRef::path("/definitely/not/here.mp3"),
                ]),
                tx,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), MixErrorKind::Execution);
        assert!(err.to_string().contains("/definitely/not/here.mp3"));
        assert!(err.diagnostics().is_some());
        assert!(backend.fs().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_aborts_engine_and_cleans_up() {
        let engine = FakeEngine::new(Behaviour::Hang);
        let backend = loaded_backend(engine.clone()).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let job = job(vec![SourceRef::memory(vec![1], "mp3")]);
        let session_id = job.session_id;

        let (result, cancelled) = tokio::join!(backend.execute(job, tx), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            backend.cancel(session_id).await
        });

        assert!(cancelled.is_ok());
        assert!(matches!(result, Err(MixError::Cancelled)));
        assert_eq!(engine.aborts.load(Ordering::SeqCst), 1);
        assert!(backend.fs().is_empty());
    }

    #[tokio::test]
    async fn test_execute_requires_load() {
        let engine = FakeEngine::new(Behaviour::Succeed);
        let backend = VmBackend::new(engine, OutputEncoding::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = backend
            .execute(job(vec![SourceRef::memory(vec![1], "mp3")]), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, MixError::Load(_)));
    }
}
