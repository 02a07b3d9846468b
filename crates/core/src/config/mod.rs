use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    isolate::{FrequencyBand, REFERENCE_SAMPLE_RATE},
    record::ContainerFormat,
    MuseError, Result,
};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub reactivity: ReactivitySettings,
    pub analyzer: AnalyzerConfig,
    pub export: ExportSettings,
}

impl AppConfig {
    /// Reads a JSON config file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.reactivity.validate(self.analyzer.sample_rate)?;
        self.analyzer.validate()?;
        self.export.validate()
    }
}

/// Tuning for one audio reactivity channel. The core reads these every
/// frame and never mutates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactivitySettings {
    pub band: FrequencyBand,
    /// Gate level in `[0, 1]`; gained signal below it is cut to silence.
    pub threshold: f32,
    /// Rise coefficient in `[0, 1]`.
    pub attack: f32,
    /// Fall coefficient in `[0, 1]`.
    pub release: f32,
    pub gain: f32,
    pub scale_sensitivity: f32,
    pub rotation_sensitivity: f32,
}

impl Default for ReactivitySettings {
    fn default() -> Self {
        Self {
            band: FrequencyBand::BASS,
            threshold: 0.1,
            attack: 0.3,
            release: 0.5,
            gain: 1.5,
            scale_sensitivity: 0.2,
            rotation_sensitivity: 0.1,
        }
    }
}

impl ReactivitySettings {
    pub fn validate(&self, sample_rate: f32) -> Result<()> {
        self.band.validate(sample_rate)?;
        let unit = |value: f32| (0.0..=1.0).contains(&value);
        if !unit(self.threshold) {
            return Err(MuseError::InvalidInput("threshold must be within [0, 1]"));
        }
        if !unit(self.attack) || !unit(self.release) {
            return Err(MuseError::InvalidInput(
                "attack and release must be within [0, 1]",
            ));
        }
        if !(self.gain.is_finite() && self.gain > 0.0) {
            return Err(MuseError::InvalidInput("gain must be positive"));
        }
        if !unit(self.scale_sensitivity) || !unit(self.rotation_sensitivity) {
            return Err(MuseError::InvalidInput(
                "sensitivities must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Settings for the spectrum analyzer that feeds snapshots into the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Window length; snapshots carry `fft_size / 2` bins.
    pub fft_size: usize,
    /// Blend factor with the previous tick, `[0, 1)`.
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    /// Sample rate used to map bins to Hz during band isolation.
    pub sample_rate: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            sample_rate: REFERENCE_SAMPLE_RATE,
        }
    }
}

impl AnalyzerConfig {
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.fft_size < 32 || !self.fft_size.is_power_of_two() {
            return Err(MuseError::InvalidInput(
                "fft size must be a power of two of at least 32",
            ));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(MuseError::InvalidInput("smoothing must be within [0, 1)"));
        }
        if !(self.min_decibels < self.max_decibels) {
            return Err(MuseError::InvalidInput(
                "min decibels must be below max decibels",
            ));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(MuseError::InvalidInput("sample rate must be positive"));
        }
        Ok(())
    }
}

/// Export options chosen in the UI before a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub format: ContainerFormat,
    pub transparent: bool,
    pub fps: u32,
    pub capture_speed: f64,
    pub jpeg_quality: u8,
    /// Directory for generated file names. `None` means the user's
    /// download directory.
    pub output_dir: Option<PathBuf>,
    pub encoder: String,
    pub overwrite: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            format: ContainerFormat::Mp4,
            transparent: false,
            fps: 60,
            capture_speed: 0.5,
            jpeg_quality: 95,
            output_dir: None,
            encoder: "ffmpeg".to_string(),
            overwrite: true,
        }
    }
}

impl ExportSettings {
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(MuseError::InvalidInput("frame rate must be non-zero"));
        }
        if !(self.capture_speed.is_finite() && self.capture_speed > 0.0) {
            return Err(MuseError::InvalidInput("capture speed must be positive"));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(MuseError::InvalidInput("jpeg quality must be within 1..=100"));
        }
        if self.transparent && !self.format.supports_alpha() {
            return Err(MuseError::InvalidInput(
                "transparent export requires an alpha-capable container (webm)",
            ));
        }
        if self.encoder.trim().is_empty() {
            return Err(MuseError::InvalidInput("encoder binary must be named"));
        }
        Ok(())
    }

    /// Directory new export files are written to.
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(dirs::download_dir)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// `muse-export-<millis>.<ext>` inside [`Self::resolved_output_dir`].
    pub fn output_path_at(&self, unix_millis: u128) -> PathBuf {
        self.resolved_output_dir().join(format!(
            "muse-export-{unix_millis}.{}",
            self.format.extension()
        ))
    }
}
