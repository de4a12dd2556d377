//! Particle layouts and the per-particle math shared by both backends.
//!
//! Particles only exist in device buffers. The functions here are the host
//! counterparts of the WGSL in [`crate::shaders`]: the reference backend runs
//! them directly, and tests use them to check the kernels' arithmetic.

use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3, Vec4};

use crate::emitter::EmitterGpu;
use crate::stages::TickParams;

/// One particle slot. 64 bytes, matches `Particle` in WGSL.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuParticle {
    pub position: [f32; 3],
    /// Remaining life in seconds. The slot is dead once this reaches zero.
    pub life: f32,
    pub velocity: [f32; 3],
    pub size: f32,
    pub acceleration: [f32; 3],
    /// Life the particle was spawned with, used for fading.
    pub initial_life: f32,
    pub color: [f32; 4],
}

/// Render-visible particle state, compacted by alive index. 32 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RenderParticle {
    pub position: [f32; 3],
    pub size: f32,
    pub color: [f32; 4],
}

impl GpuParticle {
    pub fn is_alive(&self) -> bool {
        self.life > 0.0
    }

    /// Advance by `dt`. Returns whether the particle survives.
    pub fn integrate(&mut self, dt: f32) -> bool {
        self.life -= dt;
        let acceleration = Vec3::from_array(self.acceleration);
        let velocity = Vec3::from_array(self.velocity) + acceleration * dt;
        self.velocity = velocity.to_array();
        self.position = (Vec3::from_array(self.position) + velocity * dt).to_array();
        self.is_alive()
    }

    /// Render state: color alpha fades with remaining life.
    pub fn to_render(&self) -> RenderParticle {
        let fade = if self.initial_life > 0.0 {
            (self.life / self.initial_life).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mut color = self.color;
        color[3] *= fade;
        RenderParticle {
            position: self.position,
            size: self.size,
            color,
        }
    }
}

/// Integer hash used for the per-invocation random streams.
#[inline]
pub fn hash(n: u32) -> u32 {
    let mut x = n;
    x ^= x >> 17;
    x = x.wrapping_mul(0xed5a_d4bb);
    x ^= x >> 11;
    x = x.wrapping_mul(0xac4c_1b51);
    x ^= x >> 15;
    x = x.wrapping_mul(0x3184_8bab);
    x ^= x >> 14;
    x
}

/// Uniform float in `[0, 1]` from a seed.
#[inline]
pub fn rand01(seed: u32) -> f32 {
    hash(seed) as f32 / 4_294_967_295.0
}

/// Per-invocation random stream: deterministic seed mixed with the host's
/// per-tick random pack.
pub struct RandomStream<'a> {
    base: u32,
    params: &'a TickParams,
    next: u32,
}

impl<'a> RandomStream<'a> {
    pub fn new(params: &'a TickParams, invocation: u32) -> Self {
        let base = hash(params.seed ^ hash(invocation.wrapping_add(params.frame.wrapping_mul(0x9e37_79b9))));
        Self {
            base,
            params,
            next: 0,
        }
    }

    /// Next value in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        let k = self.next;
        self.next += 1;
        fract(rand01(self.base.wrapping_add(k)) + self.params.random_pack[(k & 3) as usize])
    }
}

#[inline]
fn fract(x: f32) -> f32 {
    x - x.floor()
}

#[inline]
fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Initialize a particle from the emitter, as the Emit kernel does.
pub fn spawn_particle(emitter: &EmitterGpu, params: &TickParams, invocation: u32) -> GpuParticle {
    let mut rng = RandomStream::new(params, invocation);
    let rotation = Quat::from_array(emitter.rotation);

    let dir = Vec3::new(
        rng.next_f32() * 2.0 - 1.0,
        rng.next_f32() * 2.0 - 1.0,
        rng.next_f32() * 2.0 - 1.0,
    );
    let radius = emitter.spawn_radius * rng.next_f32();
    let offset = if dir.length() > 1.0e-4 {
        dir.normalize() * radius
    } else {
        Vec3::ZERO
    };
    let position = Vec3::from_array(emitter.position) + rotation * offset;

    let vmin = Vec3::from_array(emitter.velocity_min);
    let vmax = Vec3::from_array(emitter.velocity_max);
    let t = Vec3::new(rng.next_f32(), rng.next_f32(), rng.next_f32());
    let velocity = rotation * (vmin + (vmax - vmin) * t);

    let life = mix(emitter.life_min, emitter.life_max, rng.next_f32());
    let size = mix(emitter.size_min, emitter.size_max, rng.next_f32());
    let color = Vec4::from_array(emitter.color_min)
        .lerp(Vec4::from_array(emitter.color_max), rng.next_f32());

    GpuParticle {
        position: position.to_array(),
        life,
        velocity: velocity.to_array(),
        size,
        acceleration: emitter.acceleration,
        initial_life: life,
        color: color.to_array(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::EmitterDescriptor;

    fn params() -> TickParams {
        TickParams {
            delta_time: 0.016,
            requested_spawn: 1,
            seed: 42,
            frame: 3,
            random_pack: [0.1, 0.2, 0.3, 0.4],
        }
    }

    #[test]
    fn layouts_match_wgsl() {
        assert_eq!(std::mem::size_of::<GpuParticle>(), 64);
        assert_eq!(std::mem::size_of::<RenderParticle>(), 32);
    }

    #[test]
    fn integrate_decreases_life_and_moves() {
        let mut p = GpuParticle {
            life: 1.0,
            initial_life: 1.0,
            velocity: [1.0, 0.0, 0.0],
            acceleration: [0.0, -10.0, 0.0],
            ..Default::default()
        };
        assert!(p.integrate(0.5));
        assert_eq!(p.life, 0.5);
        assert_eq!(p.velocity, [1.0, -5.0, 0.0]);
        assert_eq!(p.position, [0.5, -2.5, 0.0]);
        assert!(!p.integrate(0.5));
    }

    #[test]
    fn render_alpha_fades_with_life() {
        let p = GpuParticle {
            life: 0.25,
            initial_life: 1.0,
            color: [1.0, 1.0, 1.0, 0.8],
            ..Default::default()
        };
        assert!((p.to_render().color[3] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn spawned_particles_respect_ranges() {
        let emitter = EmitterDescriptor::new()
            .with_lifetime(1.0..2.0)
            .with_size(0.1..0.2)
            .to_gpu();
        let params = params();
        for i in 0..256 {
            let p = spawn_particle(&emitter, &params, i);
            assert!(p.life >= 1.0 && p.life <= 2.0, "life {}", p.life);
            assert!(p.size >= 0.1 && p.size <= 0.2);
            assert_eq!(p.life, p.initial_life);
            assert!(p.is_alive());
        }
    }

    #[test]
    fn spawn_is_deterministic_per_invocation() {
        let emitter = EmitterDescriptor::sparkler(Vec3::ZERO, 10.0).to_gpu();
        let params = params();
        assert_eq!(
            spawn_particle(&emitter, &params, 5),
            spawn_particle(&emitter, &params, 5)
        );
        assert_ne!(
            spawn_particle(&emitter, &params, 5).velocity,
            spawn_particle(&emitter, &params, 6).velocity
        );
    }

    #[test]
    fn random_stream_stays_in_unit_interval() {
        let params = params();
        let mut rng = RandomStream::new(&params, 17);
        for _ in 0..64 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v));
        }
    }
}
