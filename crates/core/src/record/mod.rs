//! Frame encoder bridge: streams captured stills into an external `ffmpeg`
//! process and muxes the source audio alongside.

use std::{
    ffi::OsString,
    io::{Read, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
    thread::JoinHandle,
};

use serde::{Deserialize, Serialize};

use crate::{render::StillFormat, MuseError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// H.264 in MP4.
    #[default]
    Mp4,
    /// VP9 in WebM with an alpha plane.
    Webm,
}

impl ContainerFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Webm => "webm",
        }
    }

    pub fn supports_alpha(self) -> bool {
        matches!(self, ContainerFormat::Webm)
    }

    pub fn profile(self) -> CodecProfile {
        match self {
            ContainerFormat::Mp4 => CodecProfile {
                video_codec: "libx264",
                pixel_format: "yuv420p",
                audio_codec: "aac",
                alpha: false,
                extra: &["-crf", "23", "-preset", "fast", "-movflags", "+faststart"],
            },
            ContainerFormat::Webm => CodecProfile {
                video_codec: "libvpx-vp9",
                pixel_format: "yuva420p",
                audio_codec: "libopus",
                alpha: true,
                // Alt-ref frames drop the alpha plane.
                extra: &["-auto-alt-ref", "0", "-crf", "30", "-b:v", "0"],
            },
        }
    }
}

/// Encoder parameters for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecProfile {
    pub video_codec: &'static str,
    pub pixel_format: &'static str,
    pub audio_codec: &'static str,
    pub alpha: bool,
    pub extra: &'static [&'static str],
}

/// Configuration options for the recording subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSettings {
    pub output_path: PathBuf,
    /// Muxed into the output when the file exists; video-only otherwise.
    pub audio_path: Option<PathBuf>,
    pub fps: u32,
    pub transparent: bool,
    pub format: ContainerFormat,
    pub still: StillFormat,
}

impl RecordingSettings {
    fn usable_audio(&self) -> Option<&Path> {
        self.audio_path.as_deref().filter(|path| path.is_file())
    }
}

/// One captured still and the number of output frames it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub repeat_count: u64,
}

/// Sink contract for the capture loop.
///
/// `push_frame` is called in capture order. After a sink has reported a
/// stream failure, further pushes are dropped without queueing.
pub trait FrameSink {
    /// Returns once the sink is ready to accept frames.
    fn start(&mut self, settings: &RecordingSettings) -> Result<()>;
    fn push_frame(&mut self, frame: &EncodedFrame) -> Result<()>;
    /// Returns once the output file is complete on disk.
    fn finish(&mut self) -> Result<()>;
}

/// `ffmpeg` command line for `settings`, excluding the binary itself.
///
/// Stills arrive on stdin as an `image2pipe` stream at a fixed input rate,
/// so each written still occupies exactly one output frame.
pub fn encoder_args(settings: &RecordingSettings, overwrite: bool) -> Vec<OsString> {
    let profile = settings.format.profile();
    let audio = settings.usable_audio();
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |values: &[&str]| args.extend(values.iter().map(OsString::from));

    push(&[if overwrite { "-y" } else { "-n" }, "-loglevel", "error"]);
    push(&["-f", "image2pipe", "-r", &settings.fps.to_string()]);
    push(&["-vcodec", settings.still.input_codec(), "-i", "pipe:0"]);

    if let Some(audio) = audio {
        args.push("-i".into());
        args.push(audio.as_os_str().to_owned());
    }

    let mut push = |values: &[&str]| args.extend(values.iter().map(OsString::from));
    push(&["-c:v", profile.video_codec, "-pix_fmt", profile.pixel_format]);
    push(profile.extra);

    if audio.is_some() {
        push(&["-map", "0:v:0", "-map", "1:a:0", "-c:a", profile.audio_codec, "-shortest"]);
    } else {
        push(&["-an"]);
    }

    args.push(settings.output_path.as_os_str().to_owned());
    args
}

/// High level abstraction responsible for piping rendered frames into an
/// encoder such as FFmpeg.
#[derive(Debug)]
pub struct Recorder {
    encoder: String,
    overwrite: bool,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    settings: Option<RecordingSettings>,
    frames_written: u64,
    failure: Option<String>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Recorder {
    pub fn new(encoder: impl Into<String>) -> Self {
        Self {
            encoder: encoder.into(),
            overwrite: true,
            child: None,
            stdin: None,
            stderr_drain: None,
            settings: None,
            frames_written: 0,
            failure: None,
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn is_recording(&self) -> bool {
        self.child.is_some()
    }

    /// Output frames written to the encoder during the current session.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Output duration implied by the frames written so far.
    pub fn duration_seconds(&self) -> f64 {
        match &self.settings {
            Some(settings) if settings.fps > 0 => {
                self.frames_written as f64 / f64::from(settings.fps)
            }
            _ => 0.0,
        }
    }

    fn collect_stderr(&mut self) -> String {
        let bytes = match self.stderr_drain.take() {
            Some(handle) => match handle.join() {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(err)) => format!("failed to read encoder stderr: {err}").into_bytes(),
                Err(_) => b"encoder stderr drain thread panicked".to_vec(),
            },
            None => Vec::new(),
        };
        String::from_utf8_lossy(&bytes).trim().to_string()
    }
}

impl FrameSink for Recorder {
    fn start(&mut self, settings: &RecordingSettings) -> Result<()> {
        if self.child.is_some() {
            return Err(MuseError::msg("recorder is already running"));
        }
        if settings.fps == 0 {
            return Err(MuseError::InvalidInput("frame rate must be non-zero"));
        }
        if !is_encoder_available(&self.encoder) {
            return Err(MuseError::EncoderProcessUnavailable(format!(
                "`{}` was not found or could not be executed",
                self.encoder
            )));
        }

        ensure_parent_dir(&settings.output_path)?;
        if !self.overwrite && settings.output_path.exists() {
            return Err(MuseError::msg(format!(
                "output file '{}' already exists",
                settings.output_path.display()
            )));
        }

        let args = encoder_args(settings, self.overwrite);
        tracing::debug!(encoder = %self.encoder, ?args, "launching encoder");

        let mut child = Command::new(&self.encoder)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                MuseError::EncoderProcessUnavailable(format!(
                    "failed to launch `{}`: {err}",
                    self.encoder
                ))
            })?;

        let stdin = child.stdin.take();
        let stderr = child.stderr.take();
        let (Some(stdin), Some(mut stderr)) = (stdin, stderr) else {
            reap(&mut child);
            return Err(MuseError::EncoderProcessUnavailable(
                "encoder pipes could not be opened".to_string(),
            ));
        };
        self.stderr_drain = Some(std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        }));

        // A process that already exited never accepted input.
        let early_exit = match child.try_wait() {
            Ok(None) => None,
            Ok(Some(status)) => Some(format!("encoder exited immediately with {status}")),
            Err(err) => Some(format!("failed to poll encoder: {err}")),
        };
        if let Some(reason) = early_exit {
            drop(stdin);
            reap(&mut child);
            let stderr = self.collect_stderr();
            return Err(MuseError::EncoderProcessUnavailable(format!("{reason}: {stderr}")));
        }

        tracing::info!(
            output = %settings.output_path.display(),
            fps = settings.fps,
            format = settings.format.extension(),
            audio = settings.usable_audio().is_some(),
            "encoder started"
        );

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.settings = Some(settings.clone());
        self.frames_written = 0;
        self.failure = None;
        Ok(())
    }

    fn push_frame(&mut self, frame: &EncodedFrame) -> Result<()> {
        if self.failure.is_some() {
            tracing::debug!("dropping frame after encoder failure");
            return Ok(());
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(MuseError::msg("recorder is not running"));
        };

        // The pipe is not rate-paced, so a held frame is written once per
        // output frame it covers.
        for _ in 0..frame.repeat_count {
            if let Err(err) = stdin.write_all(&frame.data) {
                let message = format!("failed to write frame to encoder: {err}");
                tracing::warn!(%message, frames_written = self.frames_written, "encoder stream failed");
                self.failure = Some(message.clone());
                return Err(MuseError::EncoderStreamError(message));
            }
            self.frames_written += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let waited = child.wait();
        let stderr = self.collect_stderr();
        let status = waited.map_err(|err| {
            MuseError::EncoderStreamError(format!("failed to wait for encoder: {err}; {stderr}"))
        })?;

        if let Some(failure) = self.failure.take() {
            return Err(MuseError::EncoderStreamError(format!("{failure}; {stderr}")));
        }
        if !status.success() {
            return Err(MuseError::EncoderStreamError(format!(
                "encoder exited with {status}: {stderr}"
            )));
        }

        tracing::info!(
            frames = self.frames_written,
            seconds = self.duration_seconds(),
            "encoder finished"
        );
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            reap(&mut child);
        }
        let _ = self.collect_stderr();
    }
}

/// Kills `child` if it is still running and waits for it to exit.
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// In-memory sink for tests and debugging. Can be told to fail at start or
/// after a number of pushes.
#[derive(Debug, Default)]
pub struct MemorySink {
    settings: Option<RecordingSettings>,
    frames: Vec<EncodedFrame>,
    running: bool,
    finished: bool,
    fail_start: Option<String>,
    fail_after: Option<usize>,
    failed: bool,
    dropped: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_start(message: impl Into<String>) -> Self {
        Self {
            fail_start: Some(message.into()),
            ..Self::default()
        }
    }

    /// Accepts `pushes` frames, then reports a stream failure.
    pub fn failing_after(pushes: usize) -> Self {
        Self {
            fail_after: Some(pushes),
            ..Self::default()
        }
    }

    pub fn settings(&self) -> Option<&RecordingSettings> {
        self.settings.as_ref()
    }

    pub fn frames(&self) -> &[EncodedFrame] {
        &self.frames
    }

    /// Output frames the pushed stills cover.
    pub fn total_frames(&self) -> u64 {
        self.frames.iter().map(|frame| frame.repeat_count).sum()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl FrameSink for MemorySink {
    fn start(&mut self, settings: &RecordingSettings) -> Result<()> {
        if let Some(message) = &self.fail_start {
            return Err(MuseError::EncoderProcessUnavailable(message.clone()));
        }
        self.settings = Some(settings.clone());
        self.frames.clear();
        self.running = true;
        self.finished = false;
        self.failed = false;
        self.dropped = 0;
        Ok(())
    }

    fn push_frame(&mut self, frame: &EncodedFrame) -> Result<()> {
        if self.failed {
            self.dropped += 1;
            return Ok(());
        }
        if !self.running {
            return Err(MuseError::msg("sink is not running"));
        }
        if self.fail_after.is_some_and(|limit| self.frames.len() >= limit) {
            self.failed = true;
            return Err(MuseError::EncoderStreamError("simulated encoder failure".into()));
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.running = false;
        self.finished = true;
        if self.failed {
            return Err(MuseError::EncoderStreamError("simulated encoder failure".into()));
        }
        Ok(())
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Returns `true` when `binary -version` runs successfully.
pub fn is_encoder_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(format: ContainerFormat, audio: Option<PathBuf>) -> RecordingSettings {
        RecordingSettings {
            output_path: PathBuf::from("/tmp/muse/out.mp4"),
            audio_path: audio,
            fps: 60,
            transparent: format.supports_alpha(),
            format,
            still: StillFormat::for_export(format.supports_alpha(), 95),
        }
    }

    fn has_pair(args: &[OsString], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    #[test]
    fn mp4_uses_h264_and_jpeg_input() {
        let args = encoder_args(&settings(ContainerFormat::Mp4, None), true);

        assert_eq!(args[0], "-y");
        assert!(has_pair(&args, "-f", "image2pipe"));
        assert!(has_pair(&args, "-r", "60"));
        assert!(has_pair(&args, "-vcodec", "mjpeg"));
        assert!(has_pair(&args, "-c:v", "libx264"));
        assert!(has_pair(&args, "-pix_fmt", "yuv420p"));
        assert!(has_pair(&args, "-movflags", "+faststart"));
        assert!(args.iter().any(|arg| arg == "-an"));
        assert_eq!(args.last().unwrap(), "/tmp/muse/out.mp4");
    }

    #[test]
    fn webm_keeps_alpha() {
        let args = encoder_args(&settings(ContainerFormat::Webm, None), false);

        assert_eq!(args[0], "-n");
        assert!(has_pair(&args, "-vcodec", "png"));
        assert!(has_pair(&args, "-c:v", "libvpx-vp9"));
        assert!(has_pair(&args, "-pix_fmt", "yuva420p"));
        assert!(has_pair(&args, "-auto-alt-ref", "0"));
    }

    #[test]
    fn muxes_audio_only_when_present() {
        let missing = encoder_args(
            &settings(ContainerFormat::Mp4, Some(PathBuf::from("/definitely/not/here.wav"))),
            true,
        );
        assert_eq!(missing.iter().filter(|arg| *arg == "-i").count(), 1);

        let audio = std::env::temp_dir().join(format!("muse-audio-{}.wav", std::process::id()));
        std::fs::write(&audio, b"RIFF").unwrap();
        let present = encoder_args(&settings(ContainerFormat::Mp4, Some(audio.clone())), true);
        std::fs::remove_file(&audio).ok();

        assert_eq!(present.iter().filter(|arg| *arg == "-i").count(), 2);
        assert!(has_pair(&present, "-c:a", "aac"));
        assert!(present.iter().any(|arg| arg == "-shortest"));
        assert!(!present.iter().any(|arg| arg == "-an"));
    }

    #[test]
    fn missing_encoder_is_unavailable() {
        let mut recorder = Recorder::new("muse-no-such-encoder-binary");
        let err = recorder
            .start(&settings(ContainerFormat::Mp4, None))
            .unwrap_err();
        assert!(matches!(err, MuseError::EncoderProcessUnavailable(_)));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn recorder_requires_start_and_finish_is_idempotent() {
        let mut recorder = Recorder::default();
        let frame = EncodedFrame {
            data: vec![1, 2, 3],
            repeat_count: 1,
        };
        assert!(recorder.push_frame(&frame).is_err());
        assert!(recorder.finish().is_ok());
        assert_eq!(recorder.duration_seconds(), 0.0);
    }

    #[test]
    fn memory_sink_drops_frames_after_failure() {
        let mut sink = MemorySink::failing_after(1);
        sink.start(&settings(ContainerFormat::Mp4, None)).unwrap();
        let frame = EncodedFrame {
            data: vec![0xFF],
            repeat_count: 2,
        };

        sink.push_frame(&frame).unwrap();
        assert!(matches!(
            sink.push_frame(&frame),
            Err(MuseError::EncoderStreamError(_))
        ));
        sink.push_frame(&frame).unwrap();

        assert_eq!(sink.total_frames(), 2);
        assert_eq!(sink.dropped(), 1);
        assert!(sink.finish().is_err());
    }

    /// Writes an executable shell script standing in for `ffmpeg`. It
    /// answers `-version` and runs `body` for a real session.
    #[cfg(unix)]
    fn fake_encoder(name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("muse-fake-encoders-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let script = format!("#!/bin/sh\nif [ \"$1\" = \"-version\" ]; then exit 0; fi\n{body}\n");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Forks from parallel tests can hold the script open for a moment.
        let encoder = path.to_string_lossy().into_owned();
        for _ in 0..50 {
            if is_encoder_available(&encoder) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        encoder
    }

    #[cfg(unix)]
    fn scratch_output(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("muse-recorder-{}", std::process::id()))
            .join(name)
    }

    #[cfg(unix)]
    #[test]
    fn held_stills_are_written_once_per_output_frame() {
        let encoder = fake_encoder("cat-encoder", "for last; do :; done\ncat > \"$last\"");
        let mut settings = settings(ContainerFormat::Mp4, None);
        settings.output_path = scratch_output("held.mp4");

        let mut recorder = Recorder::new(encoder);
        recorder.start(&settings).unwrap();
        assert!(recorder.is_recording());

        recorder
            .push_frame(&EncodedFrame {
                data: b"AB".to_vec(),
                repeat_count: 3,
            })
            .unwrap();
        recorder
            .push_frame(&EncodedFrame {
                data: b"C".to_vec(),
                repeat_count: 1,
            })
            .unwrap();
        recorder.finish().unwrap();

        assert!(!recorder.is_recording());
        assert_eq!(std::fs::read(&settings.output_path).unwrap(), b"ABABABC");
        assert_eq!(recorder.frames_written(), 4);
        assert!((recorder.duration_seconds() - 4.0 / 60.0).abs() < 1e-12);
        std::fs::remove_file(&settings.output_path).ok();
    }

    #[cfg(unix)]
    #[test]
    fn broken_pipe_drops_later_frames_and_fails_finish() {
        let encoder = fake_encoder(
            "dying-encoder",
            "exec 0<&-\nsleep 0.5\necho \"disk full\" >&2\nexit 1",
        );
        let mut settings = settings(ContainerFormat::Mp4, None);
        settings.output_path = scratch_output("dying.mp4");

        let mut recorder = Recorder::new(encoder);
        recorder.start(&settings).unwrap();

        let frame = EncodedFrame {
            data: vec![0xAB; 1024],
            repeat_count: 1,
        };
        let mut first_error = None;
        for _ in 0..200 {
            match recorder.push_frame(&frame) {
                Ok(()) => std::thread::sleep(std::time::Duration::from_millis(10)),
                Err(err) => {
                    first_error = Some(err);
                    break;
                }
            }
        }
        assert!(matches!(first_error, Some(MuseError::EncoderStreamError(_))));

        let written = recorder.frames_written();
        recorder.push_frame(&frame).unwrap();
        assert_eq!(recorder.frames_written(), written);

        match recorder.finish() {
            Err(MuseError::EncoderStreamError(message)) => {
                assert!(message.contains("disk full"), "{message}");
            }
            other => panic!("unexpected finish result {other:?}"),
        }
        assert!(!recorder.is_recording());
    }

    #[cfg(unix)]
    #[test]
    fn encoder_exiting_at_once_is_reported() {
        let encoder = fake_encoder("quitting-encoder", "echo \"unknown encoder\" >&2\nexit 3");
        let mut settings = settings(ContainerFormat::Mp4, None);
        settings.output_path = scratch_output("quit.mp4");

        let mut recorder = Recorder::new(encoder);
        // The exit can land before or after the launch check.
        match recorder.start(&settings) {
            Err(err) => {
                assert!(matches!(err, MuseError::EncoderProcessUnavailable(_)));
                assert!(!recorder.is_recording());
            }
            Ok(()) => match recorder.finish() {
                Err(MuseError::EncoderStreamError(message)) => {
                    assert!(message.contains("unknown encoder"), "{message}");
                }
                other => panic!("unexpected finish result {other:?}"),
            },
        }
    }
}
