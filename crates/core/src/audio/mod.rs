use std::path::{Path, PathBuf};

use crate::{MuseError, Result};

/// Playback handle for the loaded track. Normal playback controls and the
/// capture scheduler both drive it, never at the same time.
pub trait Transport {
    /// `true` when a track is loaded and the handle can play it.
    fn is_loaded(&self) -> bool;
    /// File backing the loaded track, if it came from disk.
    fn source_path(&self) -> Option<&Path>;
    /// Track length in seconds, `0.0` when unknown.
    fn duration(&self) -> f64;
    /// Current playback position in seconds of track time.
    fn elapsed(&self) -> f64;
    fn speed(&self) -> f64;
    fn set_speed(&mut self, speed: f64);
    fn seek(&mut self, seconds: f64);
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    fn is_ended(&self) -> bool;
}

/// Decoded track, mixed down to mono for analysis.
#[derive(Debug, Clone)]
pub struct Track {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    samples: Vec<f32>,
}

impl Track {
    /// Decodes a WAV file with `hound`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(MuseError::InvalidInput("wav header has no channels or sample rate"));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let channels = usize::from(spec.channels);
        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        tracing::info!(path = %path.display(), sample_rate = spec.sample_rate, channels, "decoded track");

        Ok(Self {
            path: path.to_path_buf(),
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    pub fn from_samples(path: impl Into<PathBuf>, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            channels: 1,
            samples,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// The `len` samples that end at `seconds`, zero padded before the
    /// start of the track.
    pub fn window_ending_at(&self, seconds: f64, len: usize) -> Vec<f32> {
        let end = ((seconds.max(0.0) * f64::from(self.sample_rate)) as usize).min(self.samples.len());
        let start = end.saturating_sub(len);
        let mut window = vec![0.0; len - (end - start)];
        window.extend_from_slice(&self.samples[start..end]);
        window
    }
}

/// Transport whose clock is advanced by the host once per display tick.
/// Elapsed track time grows by `wall_dt * speed` while playing.
#[derive(Debug, Clone)]
pub struct PlaybackTransport {
    source: Option<PathBuf>,
    duration: f64,
    loaded: bool,
    elapsed: f64,
    speed: f64,
    paused: bool,
}

impl Default for PlaybackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackTransport {
    pub fn new() -> Self {
        Self {
            source: None,
            duration: 0.0,
            loaded: false,
            elapsed: 0.0,
            speed: 1.0,
            paused: true,
        }
    }

    pub fn for_track(track: &Track) -> Self {
        let mut transport = Self::new();
        transport.load(Some(track.path.clone()), track.duration());
        transport
    }

    pub fn load(&mut self, source: Option<PathBuf>, duration: f64) {
        self.source = source;
        self.duration = duration.max(0.0);
        self.loaded = true;
        self.elapsed = 0.0;
        self.paused = true;
    }

    pub fn unload(&mut self) {
        *self = Self::new();
    }

    /// Moves the clock forward by `wall_dt` seconds of wall time. Playback
    /// pauses itself at the end of the track.
    pub fn advance(&mut self, wall_dt: f64) {
        if !self.loaded || self.paused || !wall_dt.is_finite() || wall_dt <= 0.0 {
            return;
        }

        self.elapsed += wall_dt * self.speed;
        if self.elapsed >= self.duration {
            self.elapsed = self.duration;
            self.paused = true;
        }
    }
}

impl Transport for PlaybackTransport {
    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn elapsed(&self) -> f64 {
        self.elapsed
    }

    fn speed(&self) -> f64 {
        self.speed
    }

    fn set_speed(&mut self, speed: f64) {
        if speed.is_finite() && speed > 0.0 {
            self.speed = speed;
        }
    }

    fn seek(&mut self, seconds: f64) {
        self.elapsed = seconds.clamp(0.0, self.duration);
    }

    fn play(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(MuseError::NoTrackLoaded);
        }
        if self.is_ended() {
            self.elapsed = 0.0;
        }
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn is_ended(&self) -> bool {
        self.loaded && self.elapsed >= self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_by_speed_and_stops_at_end() {
        let mut transport = PlaybackTransport::new();
        transport.load(None, 1.0);
        transport.set_speed(0.5);
        transport.play().unwrap();

        transport.advance(0.5);
        assert!((transport.elapsed() - 0.25).abs() < 1e-12);

        transport.advance(5.0);
        assert_eq!(transport.elapsed(), 1.0);
        assert!(transport.is_ended());
        assert!(transport.is_paused());
    }

    #[test]
    fn play_requires_a_track() {
        let mut transport = PlaybackTransport::new();
        assert!(matches!(transport.play(), Err(MuseError::NoTrackLoaded)));
    }

    #[test]
    fn paused_clock_does_not_move() {
        let mut transport = PlaybackTransport::new();
        transport.load(None, 10.0);
        transport.advance(1.0);
        assert_eq!(transport.elapsed(), 0.0);
    }

    #[test]
    fn windows_are_zero_padded_at_start() {
        let track = Track::from_samples("tone.wav", 4, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(track.duration(), 2.0);
        assert_eq!(track.window_ending_at(0.5, 4), vec![0.0, 0.0, 1.0, 2.0]);
        assert_eq!(track.window_ending_at(1.5, 4), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(track.window_ending_at(9.0, 2), vec![7.0, 8.0]);
    }

    #[test]
    fn decodes_and_downmixes_wav() {
        let path = std::env::temp_dir().join(format!("muse-track-{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..800 {
            writer.write_sample(i16::MAX).unwrap();
            writer.write_sample(0_i16).unwrap();
        }
        writer.finalize().unwrap();

        let track = Track::open(&path).unwrap();
        assert_eq!(track.sample_rate, 8_000);
        assert_eq!(track.channels, 2);
        assert!((track.duration() - 0.1).abs() < 1e-9);
        assert!((track.samples()[0] - 0.5).abs() < 1e-3);
        std::fs::remove_file(&path).ok();
    }
}
