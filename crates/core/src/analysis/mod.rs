use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::AnalyzerConfig, isolate::FrequencySnapshot, MuseError, Result};

/// Stand-in for the host's analyser node: turns a window of mono PCM into a
/// byte frequency snapshot once per analysis tick.
///
/// Magnitudes are windowed with a Blackman window, blended with the previous
/// tick by `smoothing`, converted to decibels and mapped linearly from
/// `[min_decibels, max_decibels]` onto `0..=255`.
pub struct SpectrumAnalyzer {
    config: AnalyzerConfig,
    plan: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;

        let size = config.fft_size;
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let window = (0..size).map(|index| blackman_value(index, size)).collect();

        Ok(Self {
            input: plan.make_input_vec(),
            spectrum: plan.make_output_vec(),
            scratch: plan.make_scratch_vec(),
            smoothed: vec![0.0; config.bin_count()],
            window,
            plan,
            config,
        })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn bin_count(&self) -> usize {
        self.config.bin_count()
    }

    /// Clears smoothing history, e.g. after a seek.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }

    /// Analyses the most recent `fft_size` samples of `samples`. Shorter
    /// input is zero padded at the front.
    pub fn process(&mut self, samples: &[f32]) -> Result<FrequencySnapshot> {
        if samples.is_empty() {
            return Err(MuseError::InvalidInput("analysis requires at least one sample"));
        }

        let size = self.config.fft_size;
        let tail = &samples[samples.len().saturating_sub(size)..];
        let pad = size - tail.len();

        self.input[..pad].fill(0.0);
        for (index, value) in tail.iter().enumerate() {
            let slot = pad + index;
            self.input[slot] = *value * self.window[slot];
        }

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        let smoothing = self.config.smoothing;
        let min_db = self.config.min_decibels;
        let range = self.config.max_decibels - min_db;
        let norm = 1.0 / size as f32;

        let bins = self
            .smoothed
            .iter_mut()
            .zip(&self.spectrum)
            .map(|(smoothed, bin)| {
                *smoothed = smoothing * *smoothed + (1.0 - smoothing) * bin.norm() * norm;
                let db = if *smoothed > 0.0 {
                    20.0 * smoothed.log10()
                } else {
                    f32::NEG_INFINITY
                };
                let scaled = 255.0 * (db - min_db) / range;
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect::<Vec<u8>>();

        Ok(FrequencySnapshot::new(bins))
    }
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("config", &self.config)
            .finish()
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    let phase = 2.0 * PI * index as f32 / len as f32;

    a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolate::{band_level_at, FrequencyBand};

    fn analyzer() -> SpectrumAnalyzer {
        SpectrumAnalyzer::new(AnalyzerConfig {
            smoothing: 0.0,
            ..Default::default()
        })
        .unwrap()
    }

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * PI * freq * n as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn silence_maps_to_zero() {
        let snapshot = analyzer().process(&vec![0.0; 2048]).unwrap();
        assert_eq!(snapshot.bin_count(), 1024);
        assert!(snapshot.bins().iter().all(|&bin| bin == 0));
    }

    #[test]
    fn bass_tone_lands_in_bass_band() {
        let mut analyzer = analyzer();
        let snapshot = analyzer.process(&sine(80.0, 44_100.0, 2048)).unwrap();

        let bass = band_level_at(snapshot.bins(), FrequencyBand::BASS, 44_100.0);
        let treble = band_level_at(
            snapshot.bins(),
            FrequencyBand { min_hz: 5_000.0, max_hz: 10_000.0 },
            44_100.0,
        );
        assert!(bass > 0.5, "bass level {bass}");
        assert!(treble < bass * 0.25, "treble level {treble}");
    }

    #[test]
    fn short_input_is_padded() {
        let snapshot = analyzer().process(&sine(440.0, 44_100.0, 300)).unwrap();
        assert_eq!(snapshot.bin_count(), 1024);
    }

    #[test]
    fn smoothing_carries_previous_tick() {
        let mut analyzer = SpectrumAnalyzer::new(AnalyzerConfig::default()).unwrap();
        let tone = sine(80.0, 44_100.0, 2048);
        let first = analyzer.process(&tone).unwrap();
        let second = analyzer.process(&tone).unwrap();
        assert!(second.bins()[3] >= first.bins()[3]);

        let decay = analyzer.process(&vec![0.0; 2048]).unwrap();
        assert!(decay.bins()[3] > 0);
    }

    #[test]
    fn rejects_empty_input_and_bad_config() {
        assert!(analyzer().process(&[]).is_err());
        assert!(SpectrumAnalyzer::new(AnalyzerConfig {
            fft_size: 1000,
            ..Default::default()
        })
        .is_err());
    }
}
