//! Band isolation over byte frequency snapshots.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::{MuseError, Result};

/// Sample rate assumed for bin-to-frequency mapping when the analyzer does
/// not report its own.
pub const REFERENCE_SAMPLE_RATE: f32 = 44_100.0;

/// One analysis tick worth of magnitudes, one unsigned byte per bin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencySnapshot {
    bins: Vec<u8>,
}

impl FrequencySnapshot {
    pub fn new(bins: Vec<u8>) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

impl From<Vec<u8>> for FrequencySnapshot {
    fn from(bins: Vec<u8>) -> Self {
        Self::new(bins)
    }
}

/// Frequency band in Hz, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub min_hz: f32,
    pub max_hz: f32,
}

impl FrequencyBand {
    /// Kick and bass region.
    pub const BASS: Self = Self {
        min_hz: 20.0,
        max_hz: 150.0,
    };

    /// Builds a band after checking `min < max` and that both edges sit
    /// inside `[0, nyquist]` for the reference sample rate.
    pub fn new(min_hz: f32, max_hz: f32) -> Result<Self> {
        let band = Self { min_hz, max_hz };
        band.validate(REFERENCE_SAMPLE_RATE)?;
        Ok(band)
    }

    pub fn validate(&self, sample_rate: f32) -> Result<()> {
        let nyquist = sample_rate * 0.5;
        if !self.min_hz.is_finite() || !self.max_hz.is_finite() {
            return Err(MuseError::InvalidInput("band edges must be finite"));
        }
        if self.min_hz >= self.max_hz {
            return Err(MuseError::InvalidInput(
                "band minimum must be below its maximum",
            ));
        }
        if self.min_hz < 0.0 || self.max_hz > nyquist {
            return Err(MuseError::InvalidInput(
                "band edges must lie between 0 Hz and Nyquist",
            ));
        }
        Ok(())
    }
}

impl Default for FrequencyBand {
    fn default() -> Self {
        Self::BASS
    }
}

/// Width of one bin for a snapshot of `bin_count` bins.
pub fn hz_per_bin(bin_count: usize, sample_rate: f32) -> f32 {
    (sample_rate * 0.5) / bin_count.max(1) as f32
}

/// Inclusive bin range covered by `band`, clamped to the snapshot. Never
/// empty: a collapsed range still covers its start bin.
pub fn bin_range(bin_count: usize, band: FrequencyBand, sample_rate: f32) -> RangeInclusive<usize> {
    if bin_count == 0 {
        return 0..=0;
    }

    let width = hz_per_bin(bin_count, sample_rate);
    let last = bin_count - 1;
    // Float-to-int casts saturate and map NaN to zero.
    let start = ((band.min_hz / width).floor().max(0.0) as usize).min(last);
    let end = ((band.max_hz / width).ceil().max(0.0) as usize).min(last);

    start..=end.max(start)
}

/// Mean magnitude of the bins inside `band`, normalised to `[0, 1]`, using
/// [`REFERENCE_SAMPLE_RATE`] for the bin mapping. Empty input yields zero.
pub fn band_level(bins: &[u8], band: FrequencyBand) -> f32 {
    band_level_at(bins, band, REFERENCE_SAMPLE_RATE)
}

/// Same as [`band_level`] with an explicit analyzer sample rate.
pub fn band_level_at(bins: &[u8], band: FrequencyBand, sample_rate: f32) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }

    let range = bin_range(bins.len(), band, sample_rate);
    let count = range.end() - range.start() + 1;
    let sum: u32 = bins[range].iter().map(|&bin| u32::from(bin)).sum();

    (sum as f32 / count as f32) / 255.0
}
