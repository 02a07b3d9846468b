use std::{
    io::Write,
    path::{Path, PathBuf},
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use muse_visualiser_core::{
    AppConfig, ContainerFormat, ExportOrchestrator, ExportOutcome, FrameSink, MappingMatrix,
    MuseError, PlaybackTransport, PulseRenderer, ReactivityChannel, Recorder, SceneInstance,
    SpectrumAnalyzer, Track, Transport,
};
use tracing_subscriber::EnvFilter;

fn main() -> muse_visualiser_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::React { input, config, fps } => run_react(&input, config.as_deref(), fps),
        Commands::Export(args) => run_export(args),
        Commands::InitConfig { path } => {
            AppConfig::default().save(&path)?;
            tracing::info!(path = %path.display(), "wrote default config");
            Ok(())
        }
    }
}

fn run_react(input: &Path, config: Option<&Path>, fps: u32) -> muse_visualiser_core::Result<()> {
    let mut config = load_config(config)?;
    let track = Track::open(input)?;
    config.analyzer.sample_rate = track.sample_rate as f32;
    tracing::info!(input = %input.display(), fps, "printing reactivity");

    let mut analyzer = SpectrumAnalyzer::new(config.analyzer.clone())?;
    let mut channel = ReactivityChannel::with_sample_rate(config.analyzer.sample_rate);
    let mut matrix = MappingMatrix::new();
    let mut scene = SceneInstance::new();

    let fps = fps.max(1);
    let frames = (track.duration() * f64::from(fps)).ceil() as u64;
    let mut out = std::io::stdout().lock();

    for frame in 0..frames {
        let time = frame as f64 / f64::from(fps);
        let window = track.window_ending_at(time, config.analyzer.fft_size);
        let snapshot = analyzer.process(&window)?;

        let signal = channel.process(Some(&snapshot), &config.reactivity);
        let ctx = scene.binding_context(true);
        let updates = matrix.apply_from_signal(signal, &config.reactivity, &ctx);
        scene.advance(true, signal, updates);

        let line = serde_json::json!({
            "frame": frame,
            "time": time,
            "scene": scene.readout(),
        });
        writeln!(out, "{line}")?;
    }

    Ok(())
}

fn run_export(args: ExportArgs) -> muse_visualiser_core::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    let settings = &mut config.export;
    if let Some(format) = args.format {
        settings.format = format.into();
    }
    if args.transparent {
        settings.transparent = true;
    }
    if let Some(fps) = args.fps {
        settings.fps = fps;
    }
    if let Some(speed) = args.speed {
        settings.capture_speed = speed;
    }
    settings.validate()?;

    let track = Track::open(&args.input)?;
    config.analyzer.sample_rate = track.sample_rate as f32;

    let mut analyzer = SpectrumAnalyzer::new(config.analyzer.clone())?;
    let mut channel = ReactivityChannel::with_sample_rate(config.analyzer.sample_rate);
    let mut matrix = MappingMatrix::new();
    let mut scene = SceneInstance::new();
    let mut renderer = PulseRenderer::new(args.width, args.height, config.export.transparent)?;
    let mut transport = PlaybackTransport::for_track(&track);

    let recorder =
        Recorder::new(config.export.encoder.clone()).with_overwrite(config.export.overwrite);
    let capture_speed = config.export.capture_speed;
    let mut export = ExportOrchestrator::new(recorder, config.export.clone());
    match args.output {
        Some(path) => export.start_export_to(&mut transport, capture_speed, path)?,
        None => export.start_export(&mut transport, capture_speed)?,
    };

    let wall_dt = 1.0 / f64::from(args.refresh.max(1));
    let outcome = loop {
        transport.advance(wall_dt);
        let playing = !transport.is_paused();

        let window = track.window_ending_at(transport.elapsed(), config.analyzer.fft_size);
        let snapshot = match analyzer.process(&window) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                abandon_export(&mut export, &mut transport);
                return Err(err);
            }
        };

        let signal = channel.process(Some(&snapshot), &config.reactivity);
        let ctx = scene.binding_context(playing);
        let updates = matrix.apply_from_signal(signal, &config.reactivity, &ctx);
        scene.advance(playing, signal, updates);
        renderer.draw(&scene.readout());

        if let Some(outcome) = export.tick(&mut transport, &mut renderer) {
            break outcome;
        }
    };

    match outcome {
        ExportOutcome::Completed {
            output_path,
            frames,
            duration_seconds,
            ..
        } => {
            println!("{}", output_path.display());
            tracing::info!(frames, duration_seconds, "export written");
            Ok(())
        }
        ExportOutcome::Failed {
            output_path, error, ..
        } => {
            if error.is_encoder_failure() {
                tracing::warn!(output = %output_path.display(), "partial output is likely unplayable");
            }
            Err(error)
        }
    }
}

/// Finishes an export cut short by a pipeline error. A finalize failure is
/// logged and returned so it is not lost behind the original error.
fn abandon_export<S: FrameSink>(
    export: &mut ExportOrchestrator<S>,
    transport: &mut PlaybackTransport,
) -> Option<MuseError> {
    match export.stop_export(transport)? {
        ExportOutcome::Failed {
            output_path, error, ..
        } => {
            tracing::error!(output = %output_path.display(), %error, "export finalize failed");
            Some(error)
        }
        ExportOutcome::Completed { .. } => None,
    }
}

fn load_config(path: Option<&Path>) -> muse_visualiser_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive visualiser with video export", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the per-frame reactivity signal and scene state as JSON lines.
    React {
        /// WAV file to analyse.
        input: PathBuf,
        /// Optional JSON config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 60)]
        fps: u32,
    },
    /// Play a WAV file through the visualiser and encode it to a video file.
    Export(ExportArgs),
    /// Write the default configuration as JSON.
    InitConfig {
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// WAV file to export.
    input: PathBuf,
    /// Output file. Defaults to a timestamped name in the download directory.
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    format: Option<FormatArg>,
    /// Keep the background transparent (webm only).
    #[arg(long)]
    transparent: bool,
    /// Playback speed while capturing.
    #[arg(long)]
    speed: Option<f64>,
    #[arg(long)]
    fps: Option<u32>,
    #[arg(long, default_value_t = 640)]
    width: u32,
    #[arg(long, default_value_t = 360)]
    height: u32,
    /// Simulated display refresh rate in Hz.
    #[arg(long, default_value_t = 60)]
    refresh: u32,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Mp4,
    Webm,
}

impl From<FormatArg> for ContainerFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Mp4 => ContainerFormat::Mp4,
            FormatArg::Webm => ContainerFormat::Webm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muse_visualiser_core::{EncodedFrame, ExportSettings, MemorySink, RecordingSettings};

    /// Accepts frames but fails when asked to finish the file.
    struct FailingFinish;

    impl FrameSink for FailingFinish {
        fn start(&mut self, _settings: &RecordingSettings) -> muse_visualiser_core::Result<()> {
            Ok(())
        }

        fn push_frame(&mut self, _frame: &EncodedFrame) -> muse_visualiser_core::Result<()> {
            Ok(())
        }

        fn finish(&mut self) -> muse_visualiser_core::Result<()> {
            Err(MuseError::EncoderStreamError("trailer write failed".into()))
        }
    }

    fn loaded() -> PlaybackTransport {
        let mut transport = PlaybackTransport::new();
        transport.load(None, 5.0);
        transport
    }

    #[test]
    fn abandon_reports_finalize_failure() {
        let mut export = ExportOrchestrator::new(FailingFinish, ExportSettings::default());
        let mut transport = loaded();
        export
            .start_export_to(&mut transport, 0.5, PathBuf::from("/tmp/muse-abandon.mp4"))
            .unwrap();

        let error = abandon_export(&mut export, &mut transport);
        assert!(matches!(error, Some(MuseError::EncoderStreamError(_))));
        assert!(!export.is_exporting());
        assert_eq!(transport.speed(), 1.0);
        assert!(transport.is_paused());
    }

    #[test]
    fn abandon_clean_or_idle_session_reports_nothing() {
        let mut export = ExportOrchestrator::new(MemorySink::new(), ExportSettings::default());
        let mut transport = loaded();
        assert!(abandon_export(&mut export, &mut transport).is_none());

        export
            .start_export_to(&mut transport, 0.5, PathBuf::from("/tmp/muse-abandon.mp4"))
            .unwrap();
        assert!(abandon_export(&mut export, &mut transport).is_none());
        assert!(export.sink().is_finished());
    }
}
