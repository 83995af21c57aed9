//! End-to-end tests of the native backend against a scripted transcoder.
#![cfg(unix)]

use loopmix::{
    select_backend, BackendKind, Config, EventBroadcaster, MixError, MixRequest, MixingController,
};
use loopmix_types::{ControllerState, MixTrack, MixingProgress, SourceRef};
use serial_test::serial;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Answers `-version`, records its arguments, then runs `body` with `$out`
/// bound to the output path (the last argument).
fn fake_transcoder(dir: &Path, body: &str) -> PathBuf {
    let args_file = dir.join("args.txt");
    let script = format!(
        r#"#!/bin/sh
for arg; do
    if [ "$arg" = "-version" ]; then
        echo "ffmpeg version 6.1-fake"
        exit 0
    fi
done
printf '%s\n' "$@" > "{args}"
for out; do :; done
{body}
"#,
        args = args_file.display(),
        body = body
    );

    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

const SUCCEED: &str = r#"
echo "out_time_us=500000"
echo "progress=continue"
echo "out_time_us=750000"
echo "progress=end"
printf 'mixed' > "$out"
exit 0
"#;

const FAIL: &str = r#"
echo "[Parsed_atempo_0] Value 3.0 for parameter 'tempo' out of range" >&2
echo "Error initializing complex filters." >&2
exit 1
"#;

const NO_OUTPUT: &str = r#"
echo "out_time_us=100000"
exit 0
"#;

const HANG: &str = r#"
printf 'partial' > "$out"
echo "out_time_us=100000"
exec sleep 30
"#;

const NON_UTF8_NOISE: &str = r#"
printf "Input #0, mp3, from 'caf\351.mp3':\n" >&2
i=0
while [ $i -lt 2000 ]; do
    echo "  Metadata line $i" >&2
    i=$((i + 1))
done
echo "out_time_us=400000"
printf 'mixed' > "$out"
exit 0
"#;

const NON_UTF8_FAIL: &str = r#"
echo "out_time_us=100000"
printf "title=\377\376\n"
printf "[mp3 @ 0x1] Invalid data in 'caf\351.mp3'\n" >&2
exit 1
"#;

struct Fixture {
    _temp: TempDir,
    root: PathBuf,
    output_dir: PathBuf,
    staging_dir: PathBuf,
    controller: MixingController,
}

impl Fixture {
    async fn new(body: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let output_dir = root.join("out");
        let staging_dir = root.join("staging");
        std::fs::create_dir_all(&staging_dir).unwrap();

        let mut config = Config::for_output_dir(&output_dir);
        config.ffmpeg_path = fake_transcoder(&root, body);
        config.staging_dir = Some(staging_dir.clone());
        config.backend = BackendKind::Native;

        let backend = select_backend(&config, None).await.unwrap();
        let controller = MixingController::new(backend, EventBroadcaster::default());

        Self {
            _temp: temp,
            root,
            output_dir,
            staging_dir,
            controller,
        }
    }

    fn tracks(&self) -> Vec<MixTrack> {
        vec![
            MixTrack::new(SourceRef::path(self.root.join("guitar.mp3"))),
            MixTrack::new(SourceRef::memory(vec![0u8; 64], "m4a"))
                .with_speed(2.48)
                .with_volume(0),
        ]
    }

    fn recorded_args(&self) -> Vec<String> {
        std::fs::read_to_string(self.root.join("args.txt"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn output_files(&self) -> usize {
        match std::fs::read_dir(&self.output_dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    fn staged_dirs(&self) -> usize {
        std::fs::read_dir(&self.staging_dir).unwrap().count()
    }
}

#[tokio::test]
#[serial]
async fn mix_writes_output_and_reports_progress() {
    let fixture = Fixture::new(SUCCEED).await;
    let seen: Arc<Mutex<Vec<MixingProgress>>> = Arc::default();
    let sink = seen.clone();

    let output = fixture
        .controller
        .mix(MixRequest::new(fixture.tracks()).on_progress(move |p| sink.lock().unwrap().push(p)))
        .await
        .unwrap();

    let path = output.path().unwrap().to_path_buf();
    assert_eq!(path.parent(), Some(fixture.output_dir.as_path()));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("mixed_"));
    assert!(name.ends_with(".mp3"));
    assert_eq!(std::fs::read(&path).unwrap(), b"mixed");

    let ratios: Vec<f64> = seen.lock().unwrap().iter().map(|p| p.ratio).collect();
    assert_eq!(ratios, vec![0.5, 0.75, 1.0]);

    let args = fixture.recorded_args();
    let graph = "[0:a]volume=1.0[a0];[1:a]atempo=2.0,atempo=1.24,volume=0.0[a1];\
                 [a0][a1]amix=inputs=2:duration=longest:normalize=0[out]";
    let position = |flag: &str| args.iter().position(|a| a == flag).unwrap();
    assert_eq!(args[position("-filter_complex") + 1], graph);
    assert_eq!(args[position("-map") + 1], "[out]");
    assert_eq!(args[position("-codec:a") + 1], "libmp3lame");
    assert_eq!(args[position("-b:a") + 1], "128k");
    assert_eq!(args[position("-ar") + 1], "44100");
    assert_eq!(args[args.len() - 2], "-y");
    assert!(args[args.len() - 1].ends_with(&name));

    let inputs: Vec<&String> = args
        .iter()
        .enumerate()
        .filter(|(i, _)| *i > 0 && args[i - 1] == "-i")
        .map(|(_, a)| a)
        .collect();
    assert_eq!(inputs.len(), 2);
    assert!(inputs[0].ends_with("guitar.mp3"));
    assert!(inputs[1].ends_with("input1.m4a"));

    assert_eq!(fixture.staged_dirs(), 0);
    assert_eq!(fixture.controller.state(), ControllerState::Idle);
}

#[tokio::test]
#[serial]
async fn failure_carries_diagnostics_and_cleans_up() {
    let fixture = Fixture::new(FAIL).await;

    let err = fixture
        .controller
        .mix(MixRequest::new(fixture.tracks()))
        .await
        .unwrap_err();

    match &err {
        MixError::Execution {
            exit_code,
            diagnostics,
            ..
        } => {
            assert_eq!(*exit_code, Some(1));
            let diagnostics = diagnostics.as_deref().unwrap();
            assert!(diagnostics.contains("atempo"));
            assert!(diagnostics.ends_with("Error initializing complex filters."));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.user_message(), "Audio mixing encountered an error");
    assert_eq!(fixture.output_files(), 0);
    assert_eq!(fixture.staged_dirs(), 0);
    assert_eq!(fixture.controller.state(), ControllerState::Failed);
}

#[tokio::test]
#[serial]
async fn success_without_output_is_reported() {
    let fixture = Fixture::new(NO_OUTPUT).await;

    let err = fixture
        .controller
        .mix(MixRequest::new(fixture.tracks()))
        .await
        .unwrap_err();

    assert!(matches!(err, MixError::OutputMissing(_)));
    assert_eq!(fixture.output_files(), 0);
    assert_eq!(fixture.staged_dirs(), 0);
}

#[tokio::test]
#[serial]
async fn cancel_kills_transcoder_and_removes_partial_output() {
    let fixture = Fixture::new(HANG).await;
    let controller = &fixture.controller;

    let mix = controller.mix(MixRequest::new(fixture.tracks()));
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        controller.cancel().await.unwrap();
        (fixture.output_files(), fixture.staged_dirs())
    };

    let (result, (outputs_after_cancel, staged_after_cancel)) =
        tokio::time::timeout(Duration::from_secs(10), async { tokio::join!(mix, cancel) })
            .await
            .unwrap();

    assert!(matches!(result, Err(MixError::Cancelled)));
    assert_eq!(outputs_after_cancel, 0);
    assert_eq!(staged_after_cancel, 0);
    assert_eq!(controller.state(), ControllerState::Idle);

    // cancelling a finished session is a no-op
    controller.cancel().await.unwrap();
}

#[tokio::test]
#[serial]
async fn non_utf8_stderr_does_not_break_the_session() {
    let fixture = Fixture::new(NON_UTF8_NOISE).await;

    let output = tokio::time::timeout(
        Duration::from_secs(10),
        fixture.controller.mix(MixRequest::new(fixture.tracks())),
    )
    .await
    .unwrap()
    .unwrap();

    let path = output.path().unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"mixed");
    assert_eq!(fixture.staged_dirs(), 0);
    assert_eq!(fixture.controller.state(), ControllerState::Idle);
}

#[tokio::test]
#[serial]
async fn non_utf8_diagnostics_are_kept() {
    let fixture = Fixture::new(NON_UTF8_FAIL).await;

    let err = fixture
        .controller
        .mix(MixRequest::new(fixture.tracks()))
        .await
        .unwrap_err();

    assert!(matches!(err, MixError::Execution { exit_code: Some(1), .. }));
    assert_eq!(
        err.diagnostics(),
        Some("[mp3 @ 0x1] Invalid data in 'caf\u{FFFD}.mp3'")
    );
    assert_eq!(fixture.output_files(), 0);
}

#[tokio::test]
#[serial]
async fn prepare_fails_without_transcoder() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::for_output_dir(temp.path().join("out"));
    config.ffmpeg_path = temp.path().join("missing-ffmpeg");
    config.backend = BackendKind::Native;

    let backend = select_backend(&config, None).await.unwrap();
    let controller = MixingController::new(backend, EventBroadcaster::default());

    let err = controller.prepare(None).await.unwrap_err();
    assert!(matches!(err, MixError::Load(_)));
    assert!(!controller.is_ready());
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[tokio::test]
#[serial]
async fn auto_selects_native_when_transcoder_runs() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::for_output_dir(temp.path().join("out"));
    config.ffmpeg_path = fake_transcoder(temp.path(), SUCCEED);

    let backend = select_backend(&config, None).await.unwrap();
    assert_eq!(backend.name(), "native");
}
