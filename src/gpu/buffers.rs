//! Per-emitter GPU resources.
//!
//! | Buffer          | Usage                      | Contents                              |
//! |-----------------|----------------------------|---------------------------------------|
//! | `particles`     | storage                    | `capacity` × [`GpuParticle`]          |
//! | `dead`          | storage                    | free slot indices, popped from the top |
//! | `alive[0..2]`   | storage                    | alive slot indices, ping-ponged       |
//! | `render[0..2]`  | storage (compute + vertex) | [`RenderParticle`] in alive order     |
//! | `counter`       | storage                    | [`ParticleCounter`]                   |
//! | `counter_host`  | map-read                   | host mirror of the counter            |
//! | `indirect`      | storage + indirect         | [`IndirectArgs`]                      |
//! | `descriptor`    | uniform                    | [`EmitterGpu`]                        |
//! | `params`        | uniform                    | [`TickParams`]                        |
//!
//! The initial counter, dead list and particle block are written into one
//! staging buffer mapped at creation and copied into the device buffers by
//! the first submission.

use std::mem::size_of;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::deferred::{Epoch, ReleaseQueue, ScopedBuffer};
use super::sequencer::ComputeStageSequencer;
use crate::counter::{IndirectArgs, ParticleCounter, PingPong};
use crate::emitter::EmitterGpu;
use crate::error::ParticleError;
use crate::particle::{GpuParticle, RenderParticle};
use crate::stages::{Stage, TickParams};
use crate::EmitterId;

const COUNTER_SIZE: u64 = size_of::<ParticleCounter>() as u64;
const INDEX_SIZE: u64 = size_of::<u32>() as u64;
const PARTICLE_SIZE: u64 = size_of::<GpuParticle>() as u64;
const RENDER_SIZE: u64 = size_of::<RenderParticle>() as u64;

/// Every buffer and bind group of one emitter.
pub struct EmitterBufferBatch {
    id: EmitterId,
    capacity: u32,
    particles: ScopedBuffer,
    dead: ScopedBuffer,
    alive: PingPong<ScopedBuffer>,
    render: PingPong<ScopedBuffer>,
    counter: ScopedBuffer,
    counter_host: ScopedBuffer,
    indirect: ScopedBuffer,
    descriptor: ScopedBuffer,
    params: ScopedBuffer,
    kickoff_bind_group: wgpu::BindGroup,
    particle_bind_group: wgpu::BindGroup,
    instance_bind_groups: [wgpu::BindGroup; 2],
}

impl EmitterBufferBatch {
    /// Allocate all buffers. The returned staging buffer must be copied in
    /// by [`record_initial_upload`](Self::record_initial_upload) before the
    /// first tick.
    pub fn new(
        device: &wgpu::Device,
        sequencer: &ComputeStageSequencer,
        instance_layout: &wgpu::BindGroupLayout,
        release: &Arc<ReleaseQueue>,
        id: EmitterId,
        capacity: u32,
        emitter: &EmitterGpu,
    ) -> Result<(Self, ScopedBuffer), ParticleError> {
        check_limits(device, id, capacity)?;

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let cap = capacity as u64;
        let storage = |label: &str, size: u64, extra: wgpu::BufferUsages| {
            ScopedBuffer::new(
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | extra,
                    mapped_at_creation: false,
                }),
                release,
            )
        };

        let particles = storage("Particles", cap * PARTICLE_SIZE, wgpu::BufferUsages::COPY_DST);
        let dead = storage("Dead List", cap * INDEX_SIZE, wgpu::BufferUsages::COPY_DST);
        let alive = PingPong::new(
            storage("Alive List 0", cap * INDEX_SIZE, wgpu::BufferUsages::empty()),
            storage("Alive List 1", cap * INDEX_SIZE, wgpu::BufferUsages::empty()),
        );
        let render = PingPong::new(
            storage("Render Buffer 0", cap * RENDER_SIZE, wgpu::BufferUsages::empty()),
            storage("Render Buffer 1", cap * RENDER_SIZE, wgpu::BufferUsages::empty()),
        );
        let counter = storage("Particle Counter", COUNTER_SIZE, wgpu::BufferUsages::COPY_DST);
        let indirect = storage(
            "Indirect Args",
            size_of::<IndirectArgs>() as u64,
            wgpu::BufferUsages::INDIRECT,
        );

        let counter_host = ScopedBuffer::new(
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Particle Counter Readback"),
                size: COUNTER_SIZE,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }),
            release,
        );

        let descriptor = ScopedBuffer::new(
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Emitter Descriptor"),
                contents: bytemuck::bytes_of(emitter),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            }),
            release,
        );
        let params = ScopedBuffer::new(
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Tick Params"),
                contents: bytemuck::bytes_of(&TickParams::default()),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            }),
            release,
        );

        let staging = create_staging(device, release, capacity);

        let kickoff_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Kickoff Bind Group"),
            layout: sequencer.kickoff_layout(),
            entries: &[
                entry(0, &params),
                entry(1, &counter),
                entry(2, &indirect),
            ],
        });

        let (alive_0, alive_1) = alive.both();
        let (render_0, render_1) = render.both();
        let particle_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Bind Group"),
            layout: sequencer.particle_layout(),
            entries: &[
                entry(0, &params),
                entry(1, &descriptor),
                entry(2, &counter),
                entry(3, &particles),
                entry(4, &dead),
                entry(5, alive_0),
                entry(6, alive_1),
                entry(7, render_0),
                entry(8, render_1),
            ],
        });

        let instance_bind_groups = [render_0, render_1].map(|buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Billboard Instance Bind Group"),
                layout: instance_layout,
                entries: &[entry(0, buffer)],
            })
        });

        let validation = pollster::block_on(device.pop_error_scope());
        let oom = pollster::block_on(device.pop_error_scope());
        if let Some(err) = oom.or(validation) {
            return Err(ParticleError::ResourceExhausted {
                id,
                reason: err.to_string(),
            });
        }

        let batch = Self {
            id,
            capacity,
            particles,
            dead,
            alive,
            render,
            counter,
            counter_host,
            indirect,
            descriptor,
            params,
            kickoff_bind_group,
            particle_bind_group,
            instance_bind_groups,
        };
        Ok((batch, staging))
    }

    pub fn id(&self) -> EmitterId {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Generation bit of the alive and render pairs.
    pub fn generation(&self) -> u32 {
        self.alive.generation()
    }

    /// Advance both pairs. Called once per tick, when Kickoff is recorded.
    pub fn flip(&mut self) {
        self.alive.flip();
        self.render.flip();
    }

    /// Index of the render buffer the last tick wrote.
    pub fn output_index(&self) -> u32 {
        self.render.generation() ^ 1
    }

    pub fn bind_group(&self, stage: Stage) -> &wgpu::BindGroup {
        match stage {
            Stage::Kickoff => &self.kickoff_bind_group,
            Stage::Emit | Stage::Simulate => &self.particle_bind_group,
        }
    }

    /// Billboard bind group of render buffer `index` (0 or 1).
    pub fn instance_bind_group(&self, index: u32) -> &wgpu::BindGroup {
        &self.instance_bind_groups[(index & 1) as usize]
    }

    pub fn indirect(&self) -> &wgpu::Buffer {
        &self.indirect
    }

    pub fn counter_host(&self) -> &wgpu::Buffer {
        &self.counter_host
    }

    pub fn params(&self) -> &wgpu::Buffer {
        &self.params
    }

    pub fn descriptor(&self) -> &wgpu::Buffer {
        &self.descriptor
    }

    /// Copy the staging block into the counter, dead list and particles.
    pub fn record_initial_upload(&self, encoder: &mut wgpu::CommandEncoder, staging: &wgpu::Buffer) {
        let cap = self.capacity as u64;
        let dead_bytes = cap * INDEX_SIZE;
        encoder.copy_buffer_to_buffer(staging, 0, &self.counter, 0, COUNTER_SIZE);
        encoder.copy_buffer_to_buffer(staging, COUNTER_SIZE, &self.dead, 0, dead_bytes);
        encoder.copy_buffer_to_buffer(
            staging,
            COUNTER_SIZE + dead_bytes,
            &self.particles,
            0,
            cap * PARTICLE_SIZE,
        );
    }

    pub fn record_counter_copy(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.copy_buffer_to_buffer(&self.counter, 0, &self.counter_host, 0, COUNTER_SIZE);
    }

    /// Record copies of the full particle state into a fresh readback buffer.
    ///
    /// Layout of the result: counter, particles, dead list, alive list
    /// written last tick, render buffer written last tick.
    pub fn record_snapshot(
        &self,
        device: &wgpu::Device,
        release: &Arc<ReleaseQueue>,
        encoder: &mut wgpu::CommandEncoder,
    ) -> ScopedBuffer {
        let cap = self.capacity as u64;
        let layout = SnapshotLayout::new(self.capacity);
        let readback = ScopedBuffer::new(
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Particle Snapshot Readback"),
                size: layout.total,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }),
            release,
        );
        encoder.copy_buffer_to_buffer(&self.counter, 0, &readback, 0, COUNTER_SIZE);
        encoder.copy_buffer_to_buffer(
            &self.particles,
            0,
            &readback,
            layout.particles,
            cap * PARTICLE_SIZE,
        );
        encoder.copy_buffer_to_buffer(&self.dead, 0, &readback, layout.dead, cap * INDEX_SIZE);
        encoder.copy_buffer_to_buffer(
            self.alive.next(),
            0,
            &readback,
            layout.alive,
            cap * INDEX_SIZE,
        );
        encoder.copy_buffer_to_buffer(
            self.render.next(),
            0,
            &readback,
            layout.render,
            cap * RENDER_SIZE,
        );
        readback
    }

    /// Stamp every buffer with a submission epoch.
    pub fn touch(&mut self, epoch: Epoch) {
        let Self {
            particles,
            dead,
            alive,
            render,
            counter,
            counter_host,
            indirect,
            descriptor,
            params,
            ..
        } = self;
        for buffer in [particles, dead, counter, counter_host, indirect, descriptor, params] {
            buffer.touch(epoch);
        }
        alive.for_each_mut(|b| b.touch(epoch));
        render.for_each_mut(|b| b.touch(epoch));
    }
}

/// Byte offsets inside a snapshot readback buffer.
#[derive(Copy, Clone, Debug)]
pub struct SnapshotLayout {
    pub particles: u64,
    pub dead: u64,
    pub alive: u64,
    pub render: u64,
    pub total: u64,
}

impl SnapshotLayout {
    pub fn new(capacity: u32) -> Self {
        let cap = capacity as u64;
        let particles = COUNTER_SIZE;
        let dead = particles + cap * PARTICLE_SIZE;
        let alive = dead + cap * INDEX_SIZE;
        let render = alive + cap * INDEX_SIZE;
        Self {
            particles,
            dead,
            alive,
            render,
            total: render + cap * RENDER_SIZE,
        }
    }
}

fn entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

fn check_limits(device: &wgpu::Device, id: EmitterId, capacity: u32) -> Result<(), ParticleError> {
    if capacity == 0 {
        return Err(ParticleError::ResourceExhausted {
            id,
            reason: "capacity must be at least 1".into(),
        });
    }
    let limits = device.limits();
    let largest = capacity as u64 * PARTICLE_SIZE;
    if largest > limits.max_storage_buffer_binding_size as u64 {
        return Err(ParticleError::ResourceExhausted {
            id,
            reason: format!(
                "{} particles need {} bytes, device allows {} per storage binding",
                capacity, largest, limits.max_storage_buffer_binding_size
            ),
        });
    }
    let staging = SnapshotLayout::new(capacity).total;
    if staging > limits.max_buffer_size {
        return Err(ParticleError::ResourceExhausted {
            id,
            reason: format!(
                "readback of {} bytes exceeds max buffer size {}",
                staging, limits.max_buffer_size
            ),
        });
    }
    Ok(())
}

/// Counter, descending dead list and zeroed particles, back to back.
fn create_staging(
    device: &wgpu::Device,
    release: &Arc<ReleaseQueue>,
    capacity: u32,
) -> ScopedBuffer {
    let cap = capacity as u64;
    let size = COUNTER_SIZE + cap * INDEX_SIZE + cap * PARTICLE_SIZE;
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Particle Initial Staging"),
        size,
        usage: wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: true,
    });
    {
        let mut mapped = buffer.slice(..).get_mapped_range_mut();
        let (head, rest) = mapped.split_at_mut(COUNTER_SIZE as usize);
        head.copy_from_slice(bytemuck::bytes_of(&ParticleCounter::new(capacity)));

        let (dead, particles) = rest.split_at_mut((cap * INDEX_SIZE) as usize);
        // Top of the list is slot 0, so the first pops hand out low slots.
        let slots: Vec<u32> = (0..capacity).rev().collect();
        dead.copy_from_slice(bytemuck::cast_slice(&slots));
        particles.fill(0);
    }
    buffer.unmap();
    ScopedBuffer::new(buffer, release)
}
