use serde::{Deserialize, Serialize};

use crate::mapping::{BindingContext, ParameterTarget, ParameterUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Values the UI polls after each tick instead of registering per-frame
/// callbacks with the render loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneReadout {
    pub rotation: [f32; 3],
    pub scale: f32,
    pub bloom_intensity: f32,
    pub signal: f32,
}

/// Spinning disc driven by the reactivity bindings. Written by the core once
/// per tick; read by the UI and the renderer.
#[derive(Debug, Clone)]
pub struct SceneInstance {
    /// Radians added per tick while playing.
    pub rotation_speed: [f32; 3],
    pub base_bloom: f32,
    rotation: [f32; 3],
    scale: f32,
    bloom_intensity: f32,
    signal: f32,
    pending_rotation: Option<(Axis, f32)>,
}

impl Default for SceneInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneInstance {
    pub fn new() -> Self {
        Self {
            rotation_speed: [0.0, 0.01, 0.0],
            base_bloom: 1.5,
            rotation: [0.0; 3],
            scale: 1.0,
            bloom_intensity: 1.5,
            signal: 0.0,
            pending_rotation: None,
        }
    }

    /// Queues a manual rotation override, applied at the start of the next
    /// tick.
    pub fn set_rotation(&mut self, axis: Axis, radians: f32) {
        self.pending_rotation = Some((axis, radians));
    }

    pub fn binding_context(&self, playing: bool) -> BindingContext {
        BindingContext {
            playing,
            rotation_speed_z: self.rotation_speed[2],
            base_bloom: self.base_bloom,
        }
    }

    /// Advances one render tick: manual override, continuous spin, then the
    /// reactivity updates.
    pub fn advance(&mut self, playing: bool, signal: f32, updates: &[ParameterUpdate]) {
        if let Some((axis, radians)) = self.pending_rotation.take() {
            self.rotation[axis.index()] = radians;
        }

        if playing {
            for (angle, speed) in self.rotation.iter_mut().zip(self.rotation_speed) {
                *angle += speed;
            }
        }

        self.signal = signal;
        self.apply_updates(updates);
    }

    pub fn apply_updates(&mut self, updates: &[ParameterUpdate]) {
        for update in updates {
            match update.target {
                ParameterTarget::Scale => self.scale = update.value,
                ParameterTarget::RotationBoost => self.rotation[2] += update.value,
                ParameterTarget::BloomIntensity => self.bloom_intensity = update.value,
            }
        }
    }

    pub fn readout(&self) -> SceneReadout {
        SceneReadout {
            rotation: self.rotation,
            scale: self.scale,
            bloom_intensity: self.bloom_intensity,
            signal: self.signal,
        }
    }
}
