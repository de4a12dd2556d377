//! Emitter descriptors and spawn scheduling.
//!
//! An [`EmitterDescriptor`] holds everything the Emit kernel needs to
//! initialize a particle: where the emitter is, how it is oriented, and the
//! ranges each particle attribute is drawn from. The descriptor is mirrored
//! into a small per-emitter uniform buffer ([`EmitterGpu`]) that the kernels
//! read directly.
//!
//! # Presets
//!
//! | Preset | Description |
//! |--------|-------------|
//! | [`EmitterDescriptor::fire`] | Rising embers that fade |
//! | [`EmitterDescriptor::fountain`] | Arcing jet pulled down by gravity |
//! | [`EmitterDescriptor::smoke`] | Slow, long-lived, wide spread |
//! | [`EmitterDescriptor::sparkler`] | Fast short-lived sparks in all directions |
//!
//! # Example
//!
//! ```ignore
//! let descriptor = EmitterDescriptor::fountain(Vec3::new(0.0, -0.5, 0.0), 800.0)
//!     .with_lifetime(2.0..3.0)
//!     .with_seed(7);
//! registry.create_emitter(0, descriptor)?;
//! ```

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Shortest lifetime a particle may be spawned with.
///
/// Emit only hands out particles that count as alive, so lifetimes are
/// clamped above zero.
pub const MIN_LIFETIME: f32 = 1.0e-3;

/// Emission parameters and transform of one emitter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterDescriptor {
    /// World-space spawn center.
    pub position: Vec3,
    /// Orientation applied to initial velocities and spawn offsets.
    pub rotation: Quat,
    /// Particle slots for this emitter. `None` uses the engine default.
    pub capacity: Option<u32>,
    /// Particles per second.
    pub spawn_rate: f32,
    /// Minimum seconds between two rate-driven spawn batches.
    pub spawn_gap: f32,
    /// Lifetime range in seconds.
    pub lifetime: Range<f32>,
    /// Initial velocity range, emitter-local.
    pub velocity_min: Vec3,
    pub velocity_max: Vec3,
    /// Initial billboard size range (world units, half extent).
    pub size: Range<f32>,
    /// Initial color range (RGBA).
    pub color_min: Vec4,
    pub color_max: Vec4,
    /// Constant acceleration, world space.
    pub acceleration: Vec3,
    /// Radius of the spawn volume around `position`.
    pub spawn_radius: f32,
    /// Seed for the deterministic per-particle random streams.
    pub seed: u64,
}

impl Default for EmitterDescriptor {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            capacity: None,
            spawn_rate: 0.0,
            spawn_gap: 0.0,
            lifetime: 1.0..2.0,
            velocity_min: Vec3::new(-0.5, 0.5, -0.5),
            velocity_max: Vec3::new(0.5, 1.5, 0.5),
            size: 0.01..0.02,
            color_min: Vec4::ONE,
            color_max: Vec4::ONE,
            acceleration: Vec3::ZERO,
            spawn_radius: 0.0,
            seed: 0,
        }
    }
}

impl EmitterDescriptor {
    /// Create a descriptor with default ranges and no rate-driven spawning.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // PRESETS
    // =========================================================================

    /// Fire preset: warm embers rising and fading.
    pub fn fire(position: Vec3, rate: f32) -> Self {
        Self {
            position,
            spawn_rate: rate,
            lifetime: 1.0..1.8,
            velocity_min: Vec3::new(-0.15, 0.5, -0.15),
            velocity_max: Vec3::new(0.15, 1.0, 0.15),
            size: 0.015..0.03,
            color_min: Vec4::new(1.0, 0.9, 0.3, 1.0),
            color_max: Vec4::new(0.8, 0.2, 0.0, 0.8),
            acceleration: Vec3::new(0.0, 0.4, 0.0),
            spawn_radius: 0.05,
            ..Default::default()
        }
    }

    /// Fountain preset: particles arc up and fall down.
    pub fn fountain(position: Vec3, rate: f32) -> Self {
        Self {
            position,
            spawn_rate: rate,
            lifetime: 2.5..3.5,
            velocity_min: Vec3::new(-0.3, 2.0, -0.3),
            velocity_max: Vec3::new(0.3, 2.8, 0.3),
            size: 0.01..0.015,
            color_min: Vec4::new(0.7, 0.85, 1.0, 1.0),
            color_max: Vec4::new(0.2, 0.4, 0.8, 1.0),
            acceleration: Vec3::new(0.0, -9.8 * 0.3, 0.0),
            ..Default::default()
        }
    }

    /// Smoke preset: slow-rising, long-lived, wide.
    pub fn smoke(position: Vec3, rate: f32) -> Self {
        Self {
            position,
            spawn_rate: rate,
            lifetime: 3.5..5.0,
            velocity_min: Vec3::new(-0.1, 0.2, -0.1),
            velocity_max: Vec3::new(0.1, 0.4, 0.1),
            size: 0.04..0.08,
            color_min: Vec4::new(0.4, 0.4, 0.4, 0.6),
            color_max: Vec4::new(0.15, 0.15, 0.15, 0.3),
            spawn_radius: 0.1,
            ..Default::default()
        }
    }

    /// Sparkler preset: erratic sparks flying in all directions.
    pub fn sparkler(position: Vec3, rate: f32) -> Self {
        Self {
            position,
            spawn_rate: rate,
            lifetime: 0.3..0.6,
            velocity_min: Vec3::splat(-2.0),
            velocity_max: Vec3::splat(2.0),
            size: 0.005..0.01,
            color_min: Vec4::ONE,
            color_max: Vec4::new(1.0, 0.6, 0.1, 1.0),
            spawn_radius: 0.02,
            ..Default::default()
        }
    }

    // =========================================================================
    // BUILDER METHODS
    // =========================================================================

    /// Set the world-space position.
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Set the orientation.
    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Override the engine default capacity for this emitter.
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set the spawn rate in particles per second.
    pub fn with_rate(mut self, rate: f32) -> Self {
        self.spawn_rate = rate;
        self
    }

    /// Set the minimum time between rate-driven spawn batches.
    pub fn with_spawn_gap(mut self, seconds: f32) -> Self {
        self.spawn_gap = seconds;
        self
    }

    /// Set the lifetime range.
    pub fn with_lifetime(mut self, range: Range<f32>) -> Self {
        self.lifetime = range;
        self
    }

    /// Set the emitter-local velocity range.
    pub fn with_velocity(mut self, min: Vec3, max: Vec3) -> Self {
        self.velocity_min = min;
        self.velocity_max = max;
        self
    }

    /// Set the size range.
    pub fn with_size(mut self, range: Range<f32>) -> Self {
        self.size = range;
        self
    }

    /// Set the color range.
    pub fn with_color(mut self, min: Vec4, max: Vec4) -> Self {
        self.color_min = min;
        self.color_max = max;
        self
    }

    /// Set the constant acceleration.
    pub fn with_acceleration(mut self, acceleration: Vec3) -> Self {
        self.acceleration = acceleration;
        self
    }

    /// Set the spawn volume radius.
    pub fn with_spawn_radius(mut self, radius: f32) -> Self {
        self.spawn_radius = radius;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parse a descriptor from JSON.
    pub fn from_json(json: &str) -> Result<Self, crate::error::ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Lifetime range with both ends clamped to [`MIN_LIFETIME`] and ordered.
    pub fn clamped_lifetime(&self) -> (f32, f32) {
        let a = self.lifetime.start.max(MIN_LIFETIME);
        let b = self.lifetime.end.max(MIN_LIFETIME);
        (a.min(b), a.max(b))
    }

    /// Pack into the GPU uniform layout.
    pub fn to_gpu(&self) -> EmitterGpu {
        let (life_min, life_max) = self.clamped_lifetime();
        EmitterGpu {
            position: self.position.to_array(),
            spawn_rate: self.spawn_rate.max(0.0),
            rotation: unit_rotation(self.rotation).to_array(),
            velocity_min: self.velocity_min.to_array(),
            life_min,
            velocity_max: self.velocity_max.to_array(),
            life_max,
            acceleration: self.acceleration.to_array(),
            size_min: self.size.start.max(0.0),
            color_min: self.color_min.to_array(),
            color_max: self.color_max.to_array(),
            spawn_radius: self.spawn_radius.max(0.0),
            size_max: self.size.end.max(0.0),
            spawn_gap: self.spawn_gap.max(0.0),
            _pad: 0.0,
        }
    }
}

/// Emitter uniform as read by the Emit kernel. 128 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EmitterGpu {
    pub position: [f32; 3],
    pub spawn_rate: f32,
    pub rotation: [f32; 4],
    pub velocity_min: [f32; 3],
    pub life_min: f32,
    pub velocity_max: [f32; 3],
    pub life_max: f32,
    pub acceleration: [f32; 3],
    pub size_min: f32,
    pub color_min: [f32; 4],
    pub color_max: [f32; 4],
    pub spawn_radius: f32,
    pub size_max: f32,
    pub spawn_gap: f32,
    pub _pad: f32,
}

impl EmitterGpu {
    /// Overwrite only the transform part.
    pub fn set_transform(&mut self, position: Vec3, rotation: Quat) {
        self.position = position.to_array();
        self.rotation = unit_rotation(rotation).to_array();
    }
}

/// Normalized `rotation`, or identity when it has no usable direction.
fn unit_rotation(rotation: Quat) -> Quat {
    let length_squared = rotation.length_squared();
    if length_squared.is_finite() && length_squared > 1.0e-12 {
        rotation.normalize()
    } else {
        Quat::IDENTITY
    }
}

/// Turns a spawn rate into whole per-tick spawn requests.
///
/// Fractional particles carry over between ticks. Rate-driven batches are
/// held back until `spawn_gap` seconds have passed since the previous batch;
/// explicit bursts are released on the next tick regardless of the gap.
#[derive(Clone, Debug, Default)]
pub struct SpawnAccumulator {
    carry: f32,
    since_batch: f32,
    burst: u32,
}

impl SpawnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an explicit spawn request for the next tick.
    pub fn request(&mut self, count: u32) {
        self.burst = self.burst.saturating_add(count);
    }

    /// Pending explicit requests.
    pub fn pending_burst(&self) -> u32 {
        self.burst
    }

    /// Advance by `dt` and return the spawn count for this tick.
    pub fn advance(&mut self, rate: f32, gap: f32, dt: f32) -> u32 {
        self.since_batch += dt;
        if rate > 0.0 {
            self.carry += rate * dt;
        }

        let mut count = 0u32;
        if self.since_batch >= gap && self.carry >= 1.0 {
            let whole = self.carry.floor();
            self.carry -= whole;
            count = whole.min(u32::MAX as f32) as u32;
            self.since_batch = 0.0;
        }

        count.saturating_add(std::mem::take(&mut self.burst))
    }

    /// Drop any carried fraction and pending bursts.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_layout_is_128_bytes() {
        assert_eq!(std::mem::size_of::<EmitterGpu>(), 128);
    }

    #[test]
    fn lifetime_is_clamped_and_ordered() {
        let d = EmitterDescriptor::new().with_lifetime(3.0..-1.0);
        let (min, max) = d.clamped_lifetime();
        assert_eq!(min, MIN_LIFETIME);
        assert_eq!(max, 3.0);
    }

    #[test]
    fn set_transform_keeps_emission_params() {
        let d = EmitterDescriptor::fire(Vec3::ZERO, 100.0);
        let mut gpu = d.to_gpu();
        gpu.set_transform(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(1.0));
        assert_eq!(gpu.position, [1.0, 2.0, 3.0]);
        assert_eq!(gpu.spawn_rate, 100.0);
        assert_eq!(gpu.life_min, d.to_gpu().life_min);
    }

    #[test]
    fn degenerate_rotation_falls_back_to_identity() {
        let mut gpu = EmitterDescriptor::new().to_gpu();
        let degenerate = [
            Quat::from_xyzw(0.0, 0.0, 0.0, 0.0),
            Quat::from_xyzw(f32::NAN, 0.0, 0.0, 1.0),
        ];
        for rotation in degenerate {
            gpu.set_transform(Vec3::ONE, rotation);
            assert_eq!(gpu.rotation, Quat::IDENTITY.to_array());
        }

        let d = EmitterDescriptor::new().with_rotation(Quat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        assert_eq!(d.to_gpu().rotation, Quat::IDENTITY.to_array());

        gpu.set_transform(Vec3::ONE, Quat::from_xyzw(0.0, 0.0, 0.0, 2.0));
        assert_eq!(gpu.rotation, Quat::IDENTITY.to_array());
    }

    #[test]
    fn accumulator_carries_fractions() {
        let mut acc = SpawnAccumulator::new();
        // 30 particles/s at 1/60 s per tick -> one particle every other tick.
        let counts: Vec<u32> = (0..4).map(|_| acc.advance(30.0, 0.0, 1.0 / 60.0)).collect();
        assert_eq!(counts.iter().sum::<u32>(), 2);
    }

    #[test]
    fn accumulator_honors_spawn_gap() {
        let mut acc = SpawnAccumulator::new();
        assert_eq!(acc.advance(100.0, 0.25, 0.1), 0);
        assert_eq!(acc.advance(100.0, 0.25, 0.1), 0);
        // Gap reached: everything carried so far is released at once.
        assert_eq!(acc.advance(100.0, 0.25, 0.1), 30);
        assert_eq!(acc.advance(100.0, 0.25, 0.1), 0);
    }

    #[test]
    fn bursts_bypass_rate_and_gap() {
        let mut acc = SpawnAccumulator::new();
        acc.request(100);
        acc.request(5);
        assert_eq!(acc.pending_burst(), 105);
        assert_eq!(acc.advance(0.0, 10.0, 0.016), 105);
        assert_eq!(acc.advance(0.0, 10.0, 0.016), 0);
    }

    #[test]
    fn descriptor_json_roundtrip() {
        let d = EmitterDescriptor::smoke(Vec3::new(0.0, 1.0, 0.0), 50.0).with_seed(9);
        let json = serde_json::to_string(&d).unwrap();
        let back = EmitterDescriptor::from_json(&json).unwrap();
        assert_eq!(back, d);
    }
}
