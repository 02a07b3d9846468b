//! Export session state machine tying the transport, the capture scheduler
//! and the encoder bridge together.

use std::{
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    audio::Transport,
    config::ExportSettings,
    record::{ContainerFormat, EncodedFrame, FrameSink, RecordingSettings},
    render::{FrameSource, StillFormat},
    timeline::{CapturePhase, CaptureScheduler, StopReason},
    MuseError, Result,
};

/// One export run. Exists from a successful start until finalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSession {
    pub output_path: PathBuf,
    pub format: ContainerFormat,
    pub transparent: bool,
    pub capture_speed: f64,
    pub fps: u32,
    pub still: StillFormat,
    /// Percentage of the track captured, `0..=100`.
    pub progress: f32,
    pub emitted_frames: u64,
}

/// Observable export state for the UI to poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportStatus {
    pub is_exporting: bool,
    pub progress: f32,
    pub last_output: Option<PathBuf>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub enum ExportOutcome {
    Completed {
        output_path: PathBuf,
        frames: u64,
        duration_seconds: f64,
        reason: StopReason,
    },
    /// The file at `output_path` may be incomplete or unplayable.
    Failed {
        output_path: PathBuf,
        frames: u64,
        error: MuseError,
    },
}

impl ExportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExportOutcome::Completed { .. })
    }
}

/// Owns at most one [`ExportSession`]. The transport is borrowed per call
/// because normal playback controls share it between sessions.
#[derive(Debug)]
pub struct ExportOrchestrator<S: FrameSink> {
    sink: S,
    settings: ExportSettings,
    scheduler: CaptureScheduler,
    session: Option<ExportSession>,
    status: ExportStatus,
}

impl<S: FrameSink> ExportOrchestrator<S> {
    pub fn new(sink: S, settings: ExportSettings) -> Self {
        Self {
            sink,
            settings,
            scheduler: CaptureScheduler::new(),
            session: None,
            status: ExportStatus::default(),
        }
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// Edits apply to the next session; the running one keeps its copy.
    pub fn settings_mut(&mut self) -> &mut ExportSettings {
        &mut self.settings
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn session(&self) -> Option<&ExportSession> {
        self.session.as_ref()
    }

    pub fn status(&self) -> &ExportStatus {
        &self.status
    }

    pub fn is_exporting(&self) -> bool {
        self.status.is_exporting
    }

    pub fn progress(&self) -> f32 {
        self.status.progress
    }

    pub fn phase(&self) -> CapturePhase {
        self.scheduler.phase()
    }

    /// Starts an export into a generated file name under the configured
    /// output directory.
    pub fn start_export<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        capture_speed: f64,
    ) -> Result<&ExportSession> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let output_path = self.settings.output_path_at(millis);
        self.start_export_to(transport, capture_speed, output_path)
    }

    /// Starts an export into `output_path`. Rejected while a session is
    /// active; the active session is left untouched.
    pub fn start_export_to<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        capture_speed: f64,
        output_path: PathBuf,
    ) -> Result<&ExportSession> {
        if self.session.is_some() {
            tracing::warn!("export already running, rejecting start");
            return Err(MuseError::ConcurrentExportRejected);
        }
        self.settings.validate()?;
        if !(capture_speed.is_finite() && capture_speed > 0.0) {
            return Err(MuseError::InvalidInput("capture speed must be positive"));
        }
        if !transport.is_loaded() {
            return Err(MuseError::NoTrackLoaded);
        }

        let settings = &self.settings;
        let recording = RecordingSettings {
            output_path: output_path.clone(),
            audio_path: transport.source_path().map(|path| path.to_path_buf()),
            fps: settings.fps,
            transparent: settings.transparent,
            format: settings.format,
            still: StillFormat::for_export(settings.transparent, settings.jpeg_quality),
        };

        self.sink.start(&recording)?;
        if let Err(err) = self.scheduler.begin(transport, recording.fps, capture_speed) {
            if let Err(finish_err) = self.sink.finish() {
                tracing::warn!(%finish_err, "encoder cleanup after failed start");
            }
            return Err(err);
        }

        tracing::info!(
            output = %output_path.display(),
            capture_speed,
            fps = recording.fps,
            "export started"
        );

        self.status = ExportStatus {
            is_exporting: true,
            ..ExportStatus::default()
        };
        Ok(self.session.insert(ExportSession {
            output_path,
            format: recording.format,
            transparent: recording.transparent,
            capture_speed,
            fps: recording.fps,
            still: recording.still,
            progress: 0.0,
            emitted_frames: 0,
        }))
    }

    /// Call once per display refresh. Returns the outcome on the tick that
    /// ends the session.
    pub fn tick<T, F>(&mut self, transport: &mut T, source: &mut F) -> Option<ExportOutcome>
    where
        T: Transport + ?Sized,
        F: FrameSource + ?Sized,
    {
        let still = self.session.as_ref()?.still;
        let tick = self.scheduler.tick(transport)?;

        self.status.progress = tick.progress;
        if let Some(session) = self.session.as_mut() {
            session.progress = tick.progress;
            session.emitted_frames = self.scheduler.emitted_frames();
        }

        if tick.repeat_count > 0 {
            let pushed = source
                .capture_still(still)
                .map_err(|err| MuseError::FrameCapture(err.to_string()))
                .and_then(|data| {
                    self.sink.push_frame(&EncodedFrame {
                        data,
                        repeat_count: tick.repeat_count,
                    })
                });
            if let Err(err) = pushed {
                return Some(self.finalize(transport, StopReason::EncoderFailed, Some(err)));
            }
        }

        let reason = tick.stop?;
        Some(self.finalize(transport, reason, None))
    }

    /// Stops and finishes the active export, keeping what was captured.
    /// A no-op returning `None` when nothing is exporting.
    pub fn stop_export<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Option<ExportOutcome> {
        self.session.as_ref()?;
        Some(self.finalize(transport, StopReason::Requested, None))
    }

    fn finalize<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        reason: StopReason,
        error: Option<MuseError>,
    ) -> ExportOutcome {
        self.scheduler.request_stop();
        self.scheduler.finish(transport);

        let finished = self.sink.finish();
        let error = match (error, finished) {
            (Some(first), Err(second)) => {
                tracing::warn!(%second, "encoder also failed while finishing");
                Some(first)
            }
            (Some(first), Ok(())) => Some(first),
            (None, Err(second)) => Some(second),
            (None, Ok(())) => None,
        };

        let frames = self.scheduler.emitted_frames();
        let (output_path, fps) = match self.session.take() {
            Some(session) => (session.output_path, session.fps),
            None => (PathBuf::new(), self.settings.fps),
        };
        self.status.is_exporting = false;

        match error {
            None => {
                self.status.progress = 100.0;
                self.status.last_output = Some(output_path.clone());
                self.status.last_error = None;
                let duration_seconds = frames as f64 / f64::from(fps.max(1));
                tracing::info!(
                    output = %output_path.display(),
                    frames,
                    duration_seconds,
                    ?reason,
                    "export finished"
                );
                ExportOutcome::Completed {
                    output_path,
                    frames,
                    duration_seconds,
                    reason,
                }
            }
            Some(error) => {
                tracing::error!(output = %output_path.display(), %error, "export failed");
                self.status.last_error = Some(error.to_string());
                ExportOutcome::Failed {
                    output_path,
                    frames,
                    error,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::PlaybackTransport, record::MemorySink};

    #[derive(Default)]
    struct StaticSource {
        captures: usize,
        fail: bool,
    }

    impl FrameSource for StaticSource {
        fn capture_still(&mut self, _format: StillFormat) -> Result<Vec<u8>> {
            if self.fail {
                return Err(MuseError::msg("canvas lost"));
            }
            self.captures += 1;
            Ok(vec![0xFF, 0xD8, self.captures as u8])
        }
    }

    fn loaded(duration: f64) -> PlaybackTransport {
        let mut transport = PlaybackTransport::new();
        transport.load(Some(PathBuf::from("/music/track.wav")), duration);
        transport
    }

    fn orchestrator(sink: MemorySink) -> ExportOrchestrator<MemorySink> {
        ExportOrchestrator::new(
            sink,
            ExportSettings {
                output_dir: Some(PathBuf::from("/tmp/muse-exports")),
                ..Default::default()
            },
        )
    }

    fn out() -> PathBuf {
        PathBuf::from("/tmp/muse-exports/test.mp4")
    }

    #[test]
    fn stop_when_idle_is_a_noop() {
        let mut export = orchestrator(MemorySink::new());
        let mut transport = loaded(3.0);
        assert!(export.stop_export(&mut transport).is_none());
        assert!(!export.is_exporting());
        assert!(!export.sink().is_finished());
    }

    #[test]
    fn start_without_track_changes_nothing() {
        let mut export = orchestrator(MemorySink::new());
        let mut transport = PlaybackTransport::new();

        let err = export.start_export_to(&mut transport, 0.5, out()).unwrap_err();
        assert!(matches!(err, MuseError::NoTrackLoaded));
        assert!(!export.is_exporting());
        assert!(!export.sink().is_running());
        assert_eq!(export.phase(), CapturePhase::Idle);
    }

    #[test]
    fn second_start_is_rejected() {
        let mut export = orchestrator(MemorySink::new());
        let mut transport = loaded(3.0);
        export.start_export_to(&mut transport, 0.5, out()).unwrap();

        let err = export
            .start_export_to(&mut transport, 1.0, PathBuf::from("/tmp/other.mp4"))
            .unwrap_err();
        assert!(matches!(err, MuseError::ConcurrentExportRejected));

        let session = export.session().unwrap();
        assert_eq!(session.output_path, out());
        assert_eq!(session.capture_speed, 0.5);
        assert_eq!(transport.speed(), 0.5);
        assert!(export.sink().is_running());
    }

    #[test]
    fn start_passes_recording_settings_to_sink() {
        let mut export = orchestrator(MemorySink::new());
        export.settings_mut().format = ContainerFormat::Webm;
        export.settings_mut().transparent = true;
        let mut transport = loaded(3.0);

        let session = export.start_export(&mut transport, 0.5).unwrap();
        assert_eq!(session.still, StillFormat::Png);
        assert!(session.output_path.starts_with("/tmp/muse-exports"));
        assert_eq!(session.output_path.extension().unwrap(), "webm");

        let recording = export.sink().settings().unwrap();
        assert_eq!(recording.audio_path, Some(PathBuf::from("/music/track.wav")));
        assert_eq!(recording.fps, 60);
        assert!(recording.transparent);
    }

    #[test]
    fn missed_refresh_emits_one_held_frame() {
        let mut export = orchestrator(MemorySink::new());
        let mut transport = loaded(3.0);
        let mut source = StaticSource::default();
        export.start_export_to(&mut transport, 0.5, out()).unwrap();
        assert_eq!(transport.speed(), 0.5);

        // 0.066 s of wall time at half speed lands on 0.033 s of audio.
        transport.advance(0.066);
        assert!(export.tick(&mut transport, &mut source).is_none());

        let frames = export.sink().frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].repeat_count, 1);
        assert_eq!(export.session().unwrap().emitted_frames, 1);
    }

    #[test]
    fn stop_mid_session_finalizes_and_restores_transport() {
        let mut export = orchestrator(MemorySink::new());
        let mut transport = loaded(10.0);
        let mut source = StaticSource::default();
        export.start_export_to(&mut transport, 0.5, out()).unwrap();

        for _ in 0..30 {
            transport.advance(1.0 / 60.0);
            export.tick(&mut transport, &mut source);
        }
        let outcome = export.stop_export(&mut transport).unwrap();

        match outcome {
            ExportOutcome::Completed { reason, frames, .. } => {
                assert_eq!(reason, StopReason::Requested);
                assert_eq!(frames, export.sink().total_frames());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!export.is_exporting());
        assert_eq!(export.progress(), 100.0);
        assert_eq!(export.status().last_output, Some(out()));
        assert!(export.sink().is_finished());
        assert_eq!(transport.speed(), 1.0);
        assert!(transport.is_paused());
        assert_eq!(transport.elapsed(), 0.0);

        // Late ticks after the stop do nothing.
        let pushed = export.sink().frames().len();
        assert!(export.tick(&mut transport, &mut source).is_none());
        assert_eq!(export.sink().frames().len(), pushed);
    }

    #[test]
    fn full_track_covers_every_frame() {
        let mut export = orchestrator(MemorySink::new());
        let mut transport = loaded(1.0);
        let mut source = StaticSource::default();
        export.start_export_to(&mut transport, 0.5, out()).unwrap();

        // Jittery refresh: 60 Hz with an occasional long frame.
        let steps = [1.0 / 60.0, 1.0 / 60.0, 0.05, 1.0 / 144.0];
        let mut outcome = None;
        for step in steps.iter().cycle().take(10_000) {
            transport.advance(*step);
            outcome = export.tick(&mut transport, &mut source);
            if outcome.is_some() {
                break;
            }
        }

        let outcome = outcome.expect("export should finish at end of track");
        match outcome {
            ExportOutcome::Completed {
                frames,
                duration_seconds,
                reason,
                ..
            } => {
                assert_eq!(reason, StopReason::TrackEnded);
                assert_eq!(frames, 60);
                assert_eq!(duration_seconds, 1.0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(export.sink().total_frames(), 60);
        assert_eq!(export.sink().frames().len(), source.captures);
        assert_eq!(export.progress(), 100.0);
    }

    #[test]
    fn encoder_failure_is_funneled_into_one_outcome() {
        let mut export = orchestrator(MemorySink::failing_after(2));
        let mut transport = loaded(10.0);
        let mut source = StaticSource::default();
        export.start_export_to(&mut transport, 1.0, out()).unwrap();

        let mut outcome = None;
        for _ in 0..20 {
            transport.advance(1.0 / 60.0);
            outcome = export.tick(&mut transport, &mut source);
            if outcome.is_some() {
                break;
            }
        }

        let outcome = outcome.expect("failure should end the session");
        assert!(!outcome.is_success());
        assert!(matches!(
            outcome,
            ExportOutcome::Failed {
                error: MuseError::EncoderStreamError(_),
                ..
            }
        ));
        assert!(!export.is_exporting());
        assert!(export.status().last_error.is_some());
        assert!(export.progress() < 100.0);
        assert_eq!(transport.speed(), 1.0);
        assert!(transport.is_paused());
        assert_eq!(export.phase(), CapturePhase::Idle);
    }

    #[test]
    fn encoder_launch_failure_keeps_idle() {
        let mut export = orchestrator(MemorySink::failing_start("ffmpeg missing"));
        let mut transport = loaded(3.0);

        let err = export.start_export_to(&mut transport, 0.5, out()).unwrap_err();
        assert!(matches!(err, MuseError::EncoderProcessUnavailable(_)));
        assert!(!export.is_exporting());
        assert_eq!(transport.speed(), 1.0);
        assert!(transport.is_paused());
    }

    #[test]
    fn capture_failure_ends_session() {
        let mut export = orchestrator(MemorySink::new());
        let mut transport = loaded(3.0);
        let mut source = StaticSource {
            fail: true,
            ..Default::default()
        };
        export.start_export_to(&mut transport, 1.0, out()).unwrap();

        transport.advance(0.1);
        let outcome = export.tick(&mut transport, &mut source).unwrap();
        assert!(matches!(
            outcome,
            ExportOutcome::Failed {
                error: MuseError::FrameCapture(_),
                ..
            }
        ));
        assert!(!export.is_exporting());
    }

    #[test]
    fn rejects_bad_capture_speed() {
        let mut export = orchestrator(MemorySink::new());
        let mut transport = loaded(3.0);
        for speed in [0.0, -1.0, f64::NAN] {
            assert!(export.start_export_to(&mut transport, speed, out()).is_err());
        }
        assert!(!export.sink().is_running());
    }
}
