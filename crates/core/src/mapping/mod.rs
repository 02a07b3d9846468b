//! Reactivity engine: band isolation followed by the envelope, plus the
//! bindings that turn the resulting signal into visual parameter updates.

use serde::{Deserialize, Serialize};

use crate::{
    config::ReactivitySettings,
    envelope::{self, EnvelopeState},
    isolate::{self, FrequencySnapshot, REFERENCE_SAMPLE_RATE},
};

/// Rotation boost is scaled down so a full-scale sensitivity stays subtle.
const ROTATION_BOOST_SCALE: f32 = 0.1;
/// Rotation speeds below this magnitude count as stationary.
const ROTATION_EPSILON: f32 = 1e-5;
const BLOOM_BOOST: f32 = 2.0;

/// Pure per-frame transform. An absent or empty snapshot returns zero and
/// leaves `state` untouched.
pub fn reactivity_value(
    snapshot: Option<&FrequencySnapshot>,
    settings: &ReactivitySettings,
    state: &mut EnvelopeState,
) -> f32 {
    reactivity_value_at(snapshot, settings, state, REFERENCE_SAMPLE_RATE)
}

/// Same as [`reactivity_value`] with an explicit analyzer sample rate.
pub fn reactivity_value_at(
    snapshot: Option<&FrequencySnapshot>,
    settings: &ReactivitySettings,
    state: &mut EnvelopeState,
    sample_rate: f32,
) -> f32 {
    let Some(snapshot) = snapshot.filter(|snapshot| !snapshot.is_empty()) else {
        return 0.0;
    };

    let raw = isolate::band_level_at(snapshot.bins(), settings.band, sample_rate);
    envelope::follow(raw, settings, state)
}

/// One logical reactivity channel: owns its envelope state for as long as a
/// track stays loaded.
#[derive(Debug, Clone)]
pub struct ReactivityChannel {
    state: EnvelopeState,
    sample_rate: f32,
}

impl Default for ReactivityChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactivityChannel {
    pub fn new() -> Self {
        Self::with_sample_rate(REFERENCE_SAMPLE_RATE)
    }

    pub fn with_sample_rate(sample_rate: f32) -> Self {
        Self {
            state: EnvelopeState::new(),
            sample_rate,
        }
    }

    /// Call once per render tick with the latest snapshot, if any.
    pub fn process(
        &mut self,
        snapshot: Option<&FrequencySnapshot>,
        settings: &ReactivitySettings,
    ) -> f32 {
        reactivity_value_at(snapshot, settings, &mut self.state, self.sample_rate)
    }

    pub fn value(&self) -> f32 {
        self.state.value()
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

/// Scene parameters driven by the reactivity signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterTarget {
    /// Uniform scale multiplier.
    Scale,
    /// Radians added to the z rotation this frame.
    RotationBoost,
    BloomIntensity,
}

/// Concrete value routed to a render or scene parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub target: ParameterTarget,
    pub value: f32,
}

/// What the bindings need from the scene besides the signal itself.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BindingContext {
    pub playing: bool,
    pub rotation_speed_z: f32,
    pub base_bloom: f32,
}

pub fn scale_pulse(signal: f32, settings: &ReactivitySettings) -> f32 {
    1.0 + signal * settings.scale_sensitivity
}

/// Extra z rotation in the direction the scene already spins. Zero while
/// paused or when the scene is not spinning around z.
pub fn rotation_boost(signal: f32, settings: &ReactivitySettings, ctx: &BindingContext) -> f32 {
    if !ctx.playing || ctx.rotation_speed_z.abs() <= ROTATION_EPSILON {
        return 0.0;
    }

    ctx.rotation_speed_z.signum() * signal * settings.rotation_sensitivity * ROTATION_BOOST_SCALE
}

pub fn bloom_intensity(signal: f32, base: f32) -> f32 {
    base + signal * BLOOM_BOOST
}

/// Runtime mapping matrix populated with [`ParameterUpdate`] values after each
/// reactivity frame is processed.
#[derive(Debug, Default, Clone)]
pub struct MappingMatrix {
    updates: Vec<ParameterUpdate>,
}

impl MappingMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.updates.clear();
    }

    pub fn updates(&self) -> &[ParameterUpdate] {
        &self.updates
    }

    pub fn push(&mut self, update: ParameterUpdate) {
        self.updates.push(update);
    }

    pub fn apply_from_signal(
        &mut self,
        signal: f32,
        settings: &ReactivitySettings,
        ctx: &BindingContext,
    ) -> &[ParameterUpdate] {
        self.clear();
        self.push(ParameterUpdate {
            target: ParameterTarget::Scale,
            value: scale_pulse(signal, settings),
        });
        self.push(ParameterUpdate {
            target: ParameterTarget::RotationBoost,
            value: rotation_boost(signal, settings, ctx),
        });
        self.push(ParameterUpdate {
            target: ParameterTarget::BloomIntensity,
            value: bloom_intensity(signal, ctx.base_bloom),
        });
        &self.updates
    }
}
