//! Native-process backend: runs the transcoder as a child process.

use super::{
    uri_to_path, EngineProgress, LoadProgressFn, MixJob, MixingBackend, ProgressSender,
    SessionRegistry,
};
use crate::config::Config;
use crate::error::{MixError, Result};
use crate::mix::{MixCommand, OutputEncoding};
use async_trait::async_trait;
use loopmix_types::encoding::OUTPUT_FILE_PREFIX;
use loopmix_types::{OutputRef, SessionId, SourceRef};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Number of trailing stderr lines kept as diagnostics.
const DIAGNOSTIC_LINES: usize = 40;

/// Options given to the transcoder ahead of the mix arguments.
const GLOBAL_ARGS: [&str; 4] = ["-hide_banner", "-nostats", "-progress", "pipe:1"];

/// Settings for [`NativeBackend`].
#[derive(Debug, Clone)]
pub struct NativeConfig {
    /// Transcoder executable
    pub ffmpeg_path: PathBuf,
    /// Directory mixed files are written to
    pub output_dir: PathBuf,
    /// Parent of per-session staging directories (system temp dir if unset)
    pub staging_dir: Option<PathBuf>,
    pub encoding: OutputEncoding,
    /// Output file extension
    pub extension: String,
}

/// Backend that spawns the transcoder binary for every session.
pub struct NativeBackend {
    config: NativeConfig,
    ready: AtomicBool,
    sessions: SessionRegistry,
}

impl NativeBackend {
    pub fn new(config: NativeConfig) -> Self {
        Self {
            config,
            ready: AtomicBool::new(false),
            sessions: SessionRegistry::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(NativeConfig {
            ffmpeg_path: config.ffmpeg_path.clone(),
            output_dir: config.output_dir.clone(),
            staging_dir: config.staging_dir.clone(),
            encoding: config.encoding.clone(),
            extension: config.output_extension.clone(),
        })
    }

    fn output_path(&self) -> PathBuf {
        let millis = chrono::Utc::now().timestamp_millis();
        self.config.output_dir.join(format!(
            "{}_{}.{}",
            OUTPUT_FILE_PREFIX, millis, self.config.extension
        ))
    }
}

/// Check that the transcoder can be executed and return its version line.
pub async fn probe(ffmpeg_path: &Path) -> Result<String> {
    let output = Command::new(ffmpeg_path)
        .args(["-hide_banner", "-version"])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| MixError::Load(format!("Failed to run {}: {}", ffmpeg_path.display(), e)))?;

    if !output.status.success() {
        return Err(MixError::Load(format!(
            "{} -version exited with {}",
            ffmpeg_path.display(),
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

#[async_trait]
impl MixingBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn prepare(&self, on_progress: Option<LoadProgressFn<'_>>) -> Result<()> {
        if self.is_ready() {
            debug!("Native backend already prepared");
            return Ok(());
        }

        let version = probe(&self.config.ffmpeg_path).await?;
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| {
                MixError::Load(format!(
                    "Cannot create output directory {}: {}",
                    self.config.output_dir.display(),
                    e
                ))
            })?;

        self.ready.store(true, Ordering::SeqCst);
        info!("Transcoder ready: {}", version);
        if let Some(on_progress) = on_progress {
            on_progress(1.0);
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn execute(&self, job: MixJob, progress: ProgressSender) -> Result<OutputRef> {
        let session_id = job.session_id;
        let _registration = self.sessions.register(session_id, job.cancel.clone());

        let staged =
            StagedInputs::stage(&job.sources, session_id, self.config.staging_dir.as_deref())
                .await?;

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| {
                MixError::io(
                    format!(
                        "Cannot create output directory {}",
                        self.config.output_dir.display()
                    ),
                    e,
                )
            })?;
        let output_path = self.output_path();
        let mut output = OutputGuard::new(output_path.clone());

        let inputs = staged
            .paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let command = MixCommand::new(
            inputs,
            &job.graph,
            &self.config.encoding,
            output_path.to_string_lossy(),
        );
        let mut args: Vec<String> = GLOBAL_ARGS.iter().map(|a| a.to_string()).collect();
        args.extend(command.args());

        info!(
            "Session {}: mixing {} tracks into {}",
            session_id,
            job.graph.input_count(),
            output_path.display()
        );
        debug!(
            "Executing: {} {}",
            self.config.ffmpeg_path.display(),
            args.join(" ")
        );

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MixError::execution(format!(
                    "Failed to start {}: {}",
                    self.config.ffmpeg_path.display(),
                    e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MixError::execution("Failed to capture transcoder stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MixError::execution("Failed to capture transcoder stderr"))?;
        let diagnostics = DiagnosticsTask::spawn(stderr);

        let finished = tokio::select! {
            status = async {
                pump_progress(stdout, &progress).await;
                child.wait().await
            } => Some(status),
            _ = job.cancel.cancelled() => None,
        };

        let status = match finished {
            Some(status) => {
                status.map_err(|e| MixError::io("Failed to wait for transcoder", e))?
            }
            None => {
                info!("Session {}: cancelling transcoder", session_id);
                if let Err(e) = child.start_kill() {
                    debug!("Transcoder already exited: {}", e);
                }
                let _ = child.wait().await;
                return Err(MixError::Cancelled);
            }
        };

        let diagnostics = diagnostics.finish().await;
        if !status.success() {
            error!(
                "Session {}: transcoder exited with {}: {}",
                session_id, status, diagnostics
            );
            return Err(MixError::Execution {
                message: format!("transcoder exited with {}", status),
                exit_code: status.code(),
                diagnostics: (!diagnostics.is_empty()).then_some(diagnostics),
            });
        }

        if tokio::fs::metadata(&output_path).await.is_err() {
            error!(
                "Session {}: transcoder reported success but {} does not exist",
                session_id,
                output_path.display()
            );
            return Err(MixError::OutputMissing(output_path.display().to_string()));
        }

        output.keep();
        info!("Session {}: mixing complete, output: {}", session_id, output_path.display());
        Ok(OutputRef::File { path: output_path })
    }

    async fn cancel(&self, session_id: SessionId) -> Result<()> {
        if !self.sessions.cancel(&session_id) {
            debug!("Cancel requested for inactive session {}", session_id);
        }
        Ok(())
    }
}

/// Input paths for one session, plus the private directory holding any
/// inputs that had to be written out. The directory is removed on drop.
struct StagedInputs {
    paths: Vec<PathBuf>,
    _dir: Option<TempDir>,
}

impl StagedInputs {
    async fn stage(
        sources: &[SourceRef],
        session_id: SessionId,
        staging_root: Option<&Path>,
    ) -> Result<Self> {
        let mut paths = Vec::with_capacity(sources.len());
        let mut dir: Option<TempDir> = None;

        for (index, source) in sources.iter().enumerate() {
            let path = match source {
                SourceRef::Path { path } => path.clone(),
                SourceRef::Uri { uri } => {
                    uri_to_path(uri).map_err(|reason| MixError::InvalidTrack { index, reason })?
                }
                SourceRef::Memory { bytes, .. } => {
                    let staging = match dir.take() {
                        Some(staging) => staging,
                        None => create_staging_dir(session_id, staging_root)?,
                    };
                    let path = staging
                        .path()
                        .join(format!("input{}.{}", index, source.extension()));
                    dir = Some(staging);
                    tokio::fs::write(&path, bytes).await.map_err(|e| {
                        MixError::io(format!("Failed to stage input {}", index), e)
                    })?;
                    trace!("Staged {} bytes at {}", bytes.len(), path.display());
                    path
                }
            };
            debug!("Input {}: {}", index, path.display());
            paths.push(path);
        }

        Ok(Self { paths, _dir: dir })
    }
}

fn create_staging_dir(session_id: SessionId, root: Option<&Path>) -> Result<TempDir> {
    let prefix = format!("loopmix-{}-", session_id.simple());
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix);
    let dir = match root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    };
    dir.map_err(|e| MixError::io("Cannot create staging directory", e))
}

/// Deletes the output file on drop unless the session succeeded.
struct OutputGuard {
    path: PathBuf,
    keep: bool,
}

impl OutputGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial output {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// Background reader keeping the tail of the transcoder's stderr.
struct DiagnosticsTask {
    handle: Option<JoinHandle<String>>,
}

impl DiagnosticsTask {
    fn spawn(stderr: ChildStderr) -> Self {
        Self {
            handle: Some(tokio::spawn(collect_tail(stderr, DIAGNOSTIC_LINES))),
        }
    }

    async fn finish(mut self) -> String {
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

impl Drop for DiagnosticsTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Keep the last `max_lines` lines of `reader`, draining it to EOF.
async fn collect_tail<R: AsyncRead + Unpin>(reader: R, max_lines: usize) -> String {
    let mut lines = BufReader::new(reader).split(b'\n');
    let mut tail = VecDeque::with_capacity(max_lines);
    loop {
        match lines.next_segment().await {
            Ok(Some(bytes)) => {
                let line = lossy_line(&bytes);
                trace!("transcoder: {}", line);
                if tail.len() == max_lines {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read transcoder diagnostics: {}", e);
                break;
            }
        }
    }
    Vec::from(tail).join("\n")
}

/// Forward elapsed-time samples from the `-progress` stream until EOF.
async fn pump_progress<R: AsyncRead + Unpin>(stdout: R, progress: &ProgressSender) {
    let mut lines = BufReader::new(stdout).split(b'\n');
    let mut last_elapsed = None;
    loop {
        match lines.next_segment().await {
            Ok(Some(bytes)) => {
                let Some(elapsed_ms) = parse_elapsed_ms(&lossy_line(&bytes)) else {
                    continue;
                };
                if last_elapsed == Some(elapsed_ms) {
                    continue;
                }
                last_elapsed = Some(elapsed_ms);
                // Keep draining even if nobody listens, or the child blocks on a full pipe.
                let _ = progress.send(EngineProgress::Elapsed { elapsed_ms });
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read transcoder progress: {}", e);
                break;
            }
        }
    }
}

/// Transcoder output echoes file names and tags, which need not be UTF-8.
fn lossy_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parse an `out_time_us=` / `out_time_ms=` progress line into milliseconds.
///
/// Both keys carry microseconds.
fn parse_elapsed_ms(line: &str) -> Option<u64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => value.trim().parse::<u64>().ok().map(|us| us / 1000),
        _ => None,
    }
}
