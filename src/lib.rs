//! # cinder - GPU-driven particle emitters
//!
//! Each emitter owns a fixed pool of particle slots on the device. Every
//! simulation tick runs three compute kernels against that pool and reads
//! back one small counter, so the host always knows exactly how many
//! particles to draw without ever touching particle data.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cinder::prelude::*;
//!
//! fn main() -> Result<(), ParticleError> {
//!     let config = EngineConfig::default();
//!     let backend = GpuBackend::new(GpuContext::headless()?, &config)?;
//!     let mut registry = EmitterRegistry::new(backend, config);
//!
//!     registry.create_emitter(0, EmitterDescriptor::fountain(Vec3::ZERO, 500.0))?;
//!     registry.request_spawn(0, 100)?;
//!     registry.tick(&[0], 1.0 / 60.0)?;
//!
//!     if let Some(output) = registry.render_output(0) {
//!         println!("{} particles to draw", output.alive_count);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## The Tick
//!
//! | Stage | Dispatch | Does |
//! |-------|----------|------|
//! | Kickoff | 1 workgroup | Bounds the spawn request by free slots, sizes the other two dispatches, flips the alive generation |
//! | Emit | indirect | Pops free slots, initializes particles, appends them to the next alive list |
//! | Simulate | indirect | Integrates last tick's alive particles; survivors are appended to the next alive list, the rest go back to the dead list |
//!
//! After Simulate the host waits on a fence, copies the counter to
//! host-visible memory, waits again and reads it. The alive count in that
//! counter is the instance count for the billboard draw.
//!
//! Particles emitted on a tick are first simulated on the following tick.
//!
//! ## Invariant
//!
//! After every completed tick, for every emitter:
//!
//! ```text
//! dead_count + alive_count_after_sim == capacity
//! ```
//!
//! ## Backends
//!
//! - [`gpu::GpuBackend`] runs the WGSL kernels through wgpu.
//! - [`host::HostBackend`] runs the same kernels on the CPU with atomics and
//!   rayon, for tests and machines without a GPU.

pub mod backend;
pub mod config;
pub mod counter;
pub mod emitter;
pub mod error;
pub mod gpu;
pub mod host;
pub mod index_list;
pub mod particle;
pub mod registry;
pub mod shaders;
pub mod stages;
pub mod textures;
pub mod time;

/// Scene-assigned emitter identifier.
pub type EmitterId = u32;

pub use backend::{ParticleBackend, ParticleSnapshot};
pub use bytemuck;
pub use config::EngineConfig;
pub use counter::{IndirectArgs, ParticleCounter, PingPong};
pub use emitter::{EmitterDescriptor, EmitterGpu, SpawnAccumulator};
pub use error::{ConfigError, GpuError, ParticleError, TextureError};
pub use glam::{Quat, Vec3, Vec4};
pub use particle::{GpuParticle, RenderParticle};
pub use registry::{EmitterRegistry, RenderHandle, RenderOutput};
pub use stages::{StagePlan, TickParams, TICK_PLAN};

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use cinder::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::emitter::EmitterDescriptor;
    pub use crate::error::ParticleError;
    pub use crate::gpu::{BillboardRenderer, Camera, GpuBackend, GpuContext};
    pub use crate::host::HostBackend;
    pub use crate::registry::{EmitterRegistry, RenderOutput};
    pub use crate::textures::{AddressMode, FilterMode, SpriteTexture};
    pub use crate::time::TickClock;
    pub use crate::EmitterId;
    pub use crate::{Quat, Vec3, Vec4};
}
