//! The device seam.
//!
//! [`EmitterRegistry`](crate::EmitterRegistry) drives emitters through a
//! [`ParticleBackend`]. Two implementations ship with the crate:
//!
//! - [`GpuBackend`](crate::gpu::GpuBackend): wgpu buffers, compute pipelines,
//!   indirect dispatch and fence-gated readback.
//! - [`HostBackend`](crate::host::HostBackend): the same kernels executed on
//!   the CPU with atomics, used as the reference executor and for tests.

use crate::counter::ParticleCounter;
use crate::emitter::EmitterGpu;
use crate::error::ParticleError;
use crate::particle::{GpuParticle, RenderParticle};
use crate::stages::TickParams;
use crate::EmitterId;

/// Everything a device needs to run particle emitters.
pub trait ParticleBackend {
    /// The per-emitter resource batch.
    type Batch;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Invocations per workgroup of the Emit and Simulate kernels.
    fn workgroup_size(&self) -> u32;

    /// Allocate every buffer of one emitter. Dead list full, alive lists empty.
    fn create_batch(
        &mut self,
        id: EmitterId,
        capacity: u32,
        emitter: &EmitterGpu,
    ) -> Result<Self::Batch, ParticleError>;

    /// Overwrite the emitter uniform read by the next Emit.
    fn write_descriptor(&mut self, batch: &mut Self::Batch, emitter: &EmitterGpu);

    /// Run Kickoff, Emit and Simulate, then return the counter snapshot.
    ///
    /// Blocks until the snapshot is exact.
    fn run_tick(
        &mut self,
        batch: &mut Self::Batch,
        params: &TickParams,
    ) -> Result<ParticleCounter, ParticleError>;

    /// Which of the two render buffers the last tick wrote.
    fn render_index(&self, batch: &Self::Batch) -> u32;

    /// Transient copy of the emitter's particle state, for inspection.
    fn read_snapshot(&mut self, batch: &Self::Batch) -> Result<ParticleSnapshot, ParticleError>;

    /// Release the batch. Frees never race work still in flight.
    fn destroy_batch(&mut self, batch: Self::Batch);
}

/// Host copy of one emitter's state after its last tick.
#[derive(Clone, Debug, Default)]
pub struct ParticleSnapshot {
    pub counter: ParticleCounter,
    /// Every particle slot.
    pub particles: Vec<GpuParticle>,
    /// Free slots, `dead_count` entries.
    pub dead: Vec<u32>,
    /// Alive slots in render order, `alive_count_after_sim` entries.
    pub alive: Vec<u32>,
    /// Render-visible state, `alive_count_after_sim` entries.
    pub render: Vec<RenderParticle>,
}

impl ParticleSnapshot {
    /// Whether dead and alive together hold every slot exactly once.
    pub fn is_partition(&self) -> bool {
        let capacity = self.particles.len();
        if self.dead.len() + self.alive.len() != capacity {
            return false;
        }
        let mut seen = vec![false; capacity];
        for &slot in self.dead.iter().chain(&self.alive) {
            match seen.get_mut(slot as usize) {
                Some(flag) if !*flag => *flag = true,
                _ => return false,
            }
        }
        true
    }
}
