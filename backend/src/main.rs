//! loopmix command line front end.

use anyhow::Context;
use clap::{Parser, Subcommand};
use loopmix::mix::{FilterGraph, MixCommand};
use loopmix::{
    select_backend, BackendKind, Config, EventBroadcaster, MixRequest, MixingController,
};
use loopmix_types::encoding::OUTPUT_FILE_PREFIX;
use loopmix_types::{MixTrack, OutputRef, SourceRef};
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// loopmix - flatten speed/volume adjusted tracks into one file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Transcoder executable for the native backend
    #[arg(long, global = true)]
    ffmpeg: Option<PathBuf>,

    /// Directory mixed files are written to
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Backend to use (auto, native, embedded)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mix tracks into a single file
    Mix {
        /// Track as PATH[:SPEED[:VOLUME]], e.g. take1.mp3:1.25:80
        #[arg(long = "track", required = true, value_parser = parse_track_spec)]
        tracks: Vec<MixTrack>,
    },
    /// Print the filter graph and transcoder arguments without running them
    Graph {
        /// Track as PATH[:SPEED[:VOLUME]]
        #[arg(long = "track", required = true, value_parser = parse_track_spec)]
        tracks: Vec<MixTrack>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(args.ffmpeg, args.backend, args.output_dir)
        .context("Failed to load configuration")?;
    let _log_guard = init_logging(&config)?;
    info!("Configuration loaded");

    match args.command {
        Command::Graph { tracks, json } => print_graph(&config, &tracks, json),
        Command::Mix { tracks } => run_mix(&config, tracks).await,
    }
}

/// Initialize logging. Uses `logging.log_level`, then RUST_LOG, then `info`.
fn init_logging(config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match &config.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(
                dir.unwrap_or_else(|| std::path::Path::new(".")),
                file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

fn print_graph(config: &Config, tracks: &[MixTrack], json: bool) -> anyhow::Result<()> {
    let graph = FilterGraph::build(tracks)?;
    let inputs = tracks.iter().map(|track| track.source.describe()).collect();
    let output = config.output_dir.join(format!(
        "{}_<timestamp>.{}",
        OUTPUT_FILE_PREFIX, config.output_extension
    ));
    let command = MixCommand::new(
        inputs,
        &graph,
        &config.encoding,
        output.display().to_string(),
    );

    if json {
        let plan = serde_json::json!({
            "filter_complex": graph.to_string(),
            "output_label": graph.output_label(),
            "args": command.args(),
        });
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("{}", graph);
        println!("{}", command);
    }
    Ok(())
}

async fn run_mix(config: &Config, tracks: Vec<MixTrack>) -> anyhow::Result<()> {
    let backend = select_backend(config, None).await?;
    let events = EventBroadcaster::new(config.event_buffer_size);
    let controller = MixingController::new(backend, events);

    if let Err(e) = controller.prepare(None).await {
        error!("{}", e);
        anyhow::bail!(e.user_message());
    }

    let request = MixRequest::new(tracks).on_progress(|progress| {
        eprint!("\rMixing... {:>3}%", progress.percent());
        let _ = std::io::stderr().flush();
    });

    let mix = controller.mix(request);
    tokio::pin!(mix);

    let result = tokio::select! {
        result = &mut mix => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, cancelling mix...");
            let (cancelled, result) = tokio::join!(controller.cancel(), &mut mix);
            cancelled?;
            result
        }
    };
    eprintln!();

    match result {
        Ok(OutputRef::File { path }) => {
            println!("{}", path.display());
            Ok(())
        }
        Ok(OutputRef::Buffer { bytes, .. }) => {
            let path = config.output_dir.join(format!(
                "{}_{}.{}",
                OUTPUT_FILE_PREFIX,
                chrono::Utc::now().timestamp_millis(),
                config.output_extension
            ));
            tokio::fs::create_dir_all(&config.output_dir)
                .await
                .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;
            tokio::fs::write(&path, bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{}", path.display());
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            if let Some(diagnostics) = e.diagnostics() {
                eprintln!("{}", diagnostics);
            }
            anyhow::bail!(e.user_message())
        }
    }
}

/// Parse `PATH[:SPEED[:VOLUME]]`. `file://` URIs are accepted as paths.
fn parse_track_spec(spec: &str) -> Result<MixTrack, String> {
    let mut location = spec;
    let mut numbers = Vec::new();
    for _ in 0..2 {
        match location.rsplit_once(':') {
            Some((head, tail)) if !head.is_empty() && tail.parse::<f64>().is_ok() => {
                numbers.push(tail);
                location = head;
            }
            _ => break,
        }
    }
    numbers.reverse();

    if location.is_empty() {
        return Err(format!("missing track path in '{}'", spec));
    }

    let source = if location.starts_with("file://") {
        SourceRef::uri(location)
    } else {
        SourceRef::path(location)
    };
    let mut track = MixTrack::new(source);

    if let Some(speed) = numbers.first() {
        let speed: f64 = speed
            .parse()
            .map_err(|_| format!("invalid speed '{}'", speed))?;
        track = track.with_speed(speed);
    }
    if let Some(volume) = numbers.get(1) {
        let volume: u8 = volume
            .parse()
            .map_err(|_| format!("invalid volume '{}' (expected 0-100)", volume))?;
        track = track.with_volume(volume);
    }

    track.check_ranges()?;
    Ok(track)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_track_spec_path_only() {
        let track = parse_track_spec("takes/guitar.mp3").unwrap();
        assert_eq!(track.source, SourceRef::path("takes/guitar.mp3"));
        assert_eq!(track.speed, 1.0);
        assert_eq!(track.volume, 100);
    }

    #[test]
    fn test_parse_track_spec_speed_and_volume() {
        let track = parse_track_spec("drums.wav:1.25:80").unwrap();
        assert_eq!(track.source, SourceRef::path("drums.wav"));
        assert_eq!(track.speed, 1.25);
        assert_eq!(track.volume, 80);

        let track = parse_track_spec("drums.wav:0.5").unwrap();
        assert_eq!(track.speed, 0.5);
        assert_eq!(track.volume, 100);
    }

    #[test]
    fn test_parse_track_spec_uri() {
        let track = parse_track_spec("file:///data/take.mp3:2.0").unwrap();
        assert_eq!(track.source, SourceRef::uri("file:///data/take.mp3"));
        assert_eq!(track.speed, 2.0);
    }

    #[test]
    fn test_parse_track_spec_rejects_out_of_range() {
        assert!(parse_track_spec("a.mp3:3.0").is_err());
        assert!(parse_track_spec("a.mp3:1.0:101").is_err());
        assert!(parse_track_spec("a.mp3:1.0:50.5").is_err());
        assert!(parse_track_spec("").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "loopmix",
            "mix",
            "--track",
            "a.mp3",
            "--track",
            "b.mp3:2.48:0",
            "--backend",
            "native",
        ])
        .unwrap();
        assert_eq!(args.backend, Some(BackendKind::Native));
        match args.command {
            Command::Mix { tracks } => assert_eq!(tracks.len(), 2),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
