//! Reference backend executing the kernels on the CPU.
//!
//! Each dispatch fans its invocations out over the rayon pool, and every
//! invocation claims list positions through atomic heads exactly as the WGSL
//! does with `atomicAdd`/`atomicSub`. The end of a parallel dispatch is the
//! barrier.

use std::sync::atomic::{fence, Ordering};

use log::trace;
use rayon::prelude::*;

use crate::backend::{ParticleBackend, ParticleSnapshot};
use crate::counter::{self, IndirectArgs, ParticleCounter, PingPong};
use crate::emitter::EmitterGpu;
use crate::error::ParticleError;
use crate::index_list::{IndexList, SlotBuffer};
use crate::particle::{spawn_particle, GpuParticle, RenderParticle};
use crate::stages::{Command, Stage, TickParams, TICK_PLAN};
use crate::EmitterId;

/// One side of the alive ping-pong: the index list and the render state
/// compacted in the same order.
#[derive(Debug)]
struct AliveBuffers {
    indices: IndexList,
    render: SlotBuffer<RenderParticle>,
}

impl AliveBuffers {
    fn new(capacity: u32) -> Self {
        Self {
            indices: IndexList::empty(capacity),
            render: SlotBuffer::new(capacity),
        }
    }
}

/// Host form of an emitter buffer batch.
#[derive(Debug)]
pub struct HostBatch {
    id: EmitterId,
    capacity: u32,
    emitter: EmitterGpu,
    particles: SlotBuffer<GpuParticle>,
    dead: IndexList,
    alive: PingPong<AliveBuffers>,
    emit_count: u32,
    indirect: IndirectArgs,
    host_counter: ParticleCounter,
}

impl HostBatch {
    fn new(id: EmitterId, capacity: u32, emitter: &EmitterGpu) -> Self {
        Self {
            id,
            capacity,
            emitter: *emitter,
            particles: SlotBuffer::new(capacity),
            dead: IndexList::full(capacity),
            alive: PingPong::new(AliveBuffers::new(capacity), AliveBuffers::new(capacity)),
            emit_count: 0,
            indirect: IndirectArgs::default(),
            host_counter: ParticleCounter::new(capacity),
        }
    }

    pub fn id(&self) -> EmitterId {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Live view of the device counter.
    pub fn counter(&self) -> ParticleCounter {
        ParticleCounter {
            dead_count: self.dead.len(),
            alive_count: self.alive.current().indices.len(),
            alive_count_after_sim: self.alive.next().indices.len(),
            emit_count: self.emit_count,
            alive_flip_bit: self.alive.generation(),
            _pad: [0; 3],
        }
    }

    /// Last indirect arguments written by Kickoff.
    pub fn indirect(&self) -> IndirectArgs {
        self.indirect
    }

    fn kickoff(&mut self, requested: u32, workgroup_size: u32) {
        let mut counter = self.counter();
        let args = counter::kickoff(&mut counter, requested, workgroup_size);

        // Last tick's survivors become the list Simulate reads.
        self.alive.flip();
        self.alive.next().indices.clear();
        self.emit_count = counter.emit_count;
        self.indirect = args;

        debug_assert_eq!(self.counter().counts(), counter.counts());
        debug_assert_eq!(self.alive.generation(), args.alive_flip_bit);
    }

    fn emit_invocation(&self, invocation: u32, params: &TickParams) {
        if invocation >= self.emit_count {
            return;
        }
        // Kickoff bounded emit_count by the dead count, so this cannot fail.
        let Some(slot) = self.dead.pop() else {
            return;
        };
        let particle = spawn_particle(&self.emitter, params, invocation);
        self.particles.store(slot, particle);
        self.append_alive(slot, &particle);
    }

    fn simulate_invocation(&self, invocation: u32, dt: f32) {
        let current = &self.alive.current().indices;
        if invocation >= current.len() {
            return;
        }
        let slot = current.get(invocation);
        let mut particle = self.particles.load(slot);
        let survives = particle.integrate(dt);
        self.particles.store(slot, particle);

        if survives {
            self.append_alive(slot, &particle);
        } else {
            self.dead.push(slot);
        }
    }

    fn append_alive(&self, slot: u32, particle: &GpuParticle) {
        let next = self.alive.next();
        if let Some(position) = next.indices.push(slot) {
            next.render.store(position, particle.to_render());
        }
    }
}

/// Runs particle emitters on the CPU.
#[derive(Debug, Clone)]
pub struct HostBackend {
    workgroup_size: u32,
    /// Largest particle buffer one batch may allocate, in bytes.
    max_particle_bytes: u64,
}

impl HostBackend {
    /// The particle buffer limit starts at wgpu's default storage binding
    /// size, so both backends accept the same capacities.
    pub fn new(workgroup_size: u32) -> Self {
        Self {
            workgroup_size: workgroup_size.max(1),
            max_particle_bytes: wgpu::Limits::default().max_storage_buffer_binding_size as u64,
        }
    }

    /// Set the per-batch particle buffer limit.
    pub fn with_max_particle_bytes(mut self, bytes: u64) -> Self {
        self.max_particle_bytes = bytes;
        self
    }

    pub fn max_particle_bytes(&self) -> u64 {
        self.max_particle_bytes
    }

    fn dispatch<F>(&self, groups: u32, f: F)
    where
        F: Fn(u32) + Sync + Send,
    {
        let invocations = groups * self.workgroup_size;
        (0..invocations).into_par_iter().for_each(f);
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_WORKGROUP_SIZE)
    }
}

impl ParticleBackend for HostBackend {
    type Batch = HostBatch;

    fn name(&self) -> &'static str {
        "host"
    }

    fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    fn create_batch(
        &mut self,
        id: EmitterId,
        capacity: u32,
        emitter: &EmitterGpu,
    ) -> Result<HostBatch, ParticleError> {
        if capacity == 0 {
            return Err(ParticleError::ResourceExhausted {
                id,
                reason: "capacity must be at least 1".into(),
            });
        }
        let bytes = capacity as u64 * std::mem::size_of::<GpuParticle>() as u64;
        if bytes > self.max_particle_bytes {
            return Err(ParticleError::ResourceExhausted {
                id,
                reason: format!(
                    "{} particles need {} bytes, host backend allows {}",
                    capacity, bytes, self.max_particle_bytes
                ),
            });
        }
        Ok(HostBatch::new(id, capacity, emitter))
    }

    fn write_descriptor(&mut self, batch: &mut HostBatch, emitter: &EmitterGpu) {
        batch.emitter = *emitter;
    }

    fn run_tick(
        &mut self,
        batch: &mut HostBatch,
        params: &TickParams,
    ) -> Result<ParticleCounter, ParticleError> {
        let mut snapshot = None;

        for command in TICK_PLAN.commands() {
            match *command {
                Command::Dispatch(Stage::Kickoff) => {
                    batch.kickoff(params.requested_spawn, self.workgroup_size);
                }
                Command::DispatchIndirect { stage: Stage::Emit, .. } => {
                    let batch = &*batch;
                    self.dispatch(batch.indirect.emit.groups(), |i| {
                        batch.emit_invocation(i, params)
                    });
                }
                Command::DispatchIndirect { stage: Stage::Simulate, .. } => {
                    let batch = &*batch;
                    let dt = params.delta_time;
                    self.dispatch(batch.indirect.simulate.groups(), |i| {
                        batch.simulate_invocation(i, dt)
                    });
                }
                Command::Dispatch(stage) | Command::DispatchIndirect { stage, .. } => {
                    trace!("host: no direct form for {:?}, skipping", stage);
                }
                Command::Barrier(barrier) => {
                    trace!("host barrier {:?} -> {:?}", barrier.src, barrier.dst);
                    fence(Ordering::SeqCst);
                }
                Command::FenceWait(_) => {}
                Command::CopyCounter => batch.host_counter = batch.counter(),
                Command::ReadCounter => snapshot = Some(batch.host_counter),
            }
        }

        snapshot.ok_or(ParticleError::DeviceLost {
            stage: "counter readback",
            reason: "tick plan never read the counter".into(),
        })
    }

    fn render_index(&self, batch: &HostBatch) -> u32 {
        batch.alive.generation() ^ 1
    }

    fn read_snapshot(&mut self, batch: &HostBatch) -> Result<ParticleSnapshot, ParticleError> {
        let counter = batch.counter();
        let written = batch.alive.next();
        Ok(ParticleSnapshot {
            counter,
            particles: batch.particles.prefix(batch.capacity),
            dead: batch.dead.to_vec(),
            alive: written.indices.to_vec(),
            render: written.render.prefix(counter.alive_count_after_sim),
        })
    }

    fn destroy_batch(&mut self, batch: HostBatch) {
        trace!("host: released batch for emitter {}", batch.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::EmitterDescriptor;

    fn params(spawn: u32, dt: f32) -> TickParams {
        TickParams {
            delta_time: dt,
            requested_spawn: spawn,
            seed: 1,
            frame: 0,
            random_pack: [0.0; 4],
        }
    }

    fn batch(capacity: u32) -> (HostBackend, HostBatch) {
        let mut backend = HostBackend::new(64);
        let emitter = EmitterDescriptor::new().with_lifetime(1.0..1.0).to_gpu();
        let batch = backend.create_batch(0, capacity, &emitter).unwrap();
        (backend, batch)
    }

    #[test]
    fn fresh_batch_counter() {
        let (_, batch) = batch(128);
        let c = batch.counter();
        assert_eq!(c.dead_count, 128);
        assert_eq!(c.alive_count_after_sim, 0);
    }

    #[test]
    fn oversized_batches_are_refused() {
        let emitter = EmitterDescriptor::new().to_gpu();
        let mut backend = HostBackend::new(64);
        let err = backend.create_batch(4, u32::MAX, &emitter).unwrap_err();
        assert!(matches!(err, ParticleError::ResourceExhausted { id: 4, .. }));

        let particle = std::mem::size_of::<GpuParticle>() as u64;
        let mut backend = HostBackend::new(64).with_max_particle_bytes(100 * particle);
        assert!(backend.create_batch(0, 100, &emitter).is_ok());
        assert!(backend.create_batch(1, 101, &emitter).is_err());
    }

    #[test]
    fn kickoff_sizes_dispatches() {
        let (mut backend, mut batch) = batch(1000);
        backend.run_tick(&mut batch, &params(130, 0.01)).unwrap();
        assert_eq!(batch.indirect().emit.groups(), 3);
        assert_eq!(batch.indirect().simulate.groups(), 0);

        backend.run_tick(&mut batch, &params(0, 0.01)).unwrap();
        assert_eq!(batch.indirect().emit.groups(), 0);
        assert_eq!(batch.indirect().simulate.groups(), 3);
    }

    #[test]
    fn emitted_particles_are_simulated_next_tick() {
        let (mut backend, mut batch) = batch(16);
        backend.run_tick(&mut batch, &params(4, 0.25)).unwrap();
        let snap = backend.read_snapshot(&batch).unwrap();
        for &slot in &snap.alive {
            assert_eq!(snap.particles[slot as usize].life, 1.0);
        }

        backend.run_tick(&mut batch, &params(0, 0.25)).unwrap();
        let snap = backend.read_snapshot(&batch).unwrap();
        for &slot in &snap.alive {
            assert_eq!(snap.particles[slot as usize].life, 0.75);
        }
        assert!(snap.is_partition());
    }

    #[test]
    fn render_buffer_follows_alive_order() {
        let (mut backend, mut batch) = batch(32);
        backend.run_tick(&mut batch, &params(10, 0.1)).unwrap();
        backend.run_tick(&mut batch, &params(5, 0.1)).unwrap();
        let snap = backend.read_snapshot(&batch).unwrap();
        assert_eq!(snap.alive.len(), 15);
        for (position, &slot) in snap.alive.iter().enumerate() {
            let p = snap.particles[slot as usize];
            assert_eq!(snap.render[position].position, p.position);
        }
    }
}
