//! Gain, gate and attack/release smoothing for a single control signal.

use crate::config::ReactivitySettings;

/// Smoothed value carried between frames for one reactivity channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvelopeState {
    previous: f32,
}

impl EnvelopeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value produced by the follower. May transiently exceed 1.0
    /// when gain pushes the signal past full scale.
    pub fn value(&self) -> f32 {
        self.previous
    }

    pub fn reset(&mut self) {
        self.previous = 0.0;
    }
}

/// Applies gain and the hard gate. Anything below `threshold` after gain is
/// cut to exactly zero. A NaN threshold closes the gate.
pub fn gate(raw: f32, gain: f32, threshold: f32) -> f32 {
    let raw = finite_or_zero(raw);
    let gain = finite_or_zero(gain).max(0.0);
    let signal = raw * gain;

    if threshold.is_nan() || signal < threshold {
        0.0
    } else {
        signal
    }
}

/// Advances the envelope by one frame and returns the new smoothed value.
pub fn follow(raw: f32, settings: &ReactivitySettings, state: &mut EnvelopeState) -> f32 {
    let signal = gate(raw, settings.gain, settings.threshold);
    let previous = state.previous;

    let coefficient = if signal > previous {
        unit(settings.attack)
    } else {
        unit(settings.release)
    };

    let next = previous + (signal - previous) * coefficient;
    state.previous = next;
    next
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn unit(value: f32) -> f32 {
    finite_or_zero(value).clamp(0.0, 1.0)
}
