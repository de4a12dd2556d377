//! wgpu implementation of the particle backend.
//!
//! ```ignore
//! use cinder::gpu::{GpuBackend, GpuContext};
//! use cinder::{EmitterRegistry, EngineConfig};
//!
//! let context = GpuContext::headless()?;
//! let backend = GpuBackend::new(context, &EngineConfig::default())?;
//! let mut registry = EmitterRegistry::new(backend, EngineConfig::default());
//! ```

mod billboard;
mod buffers;
mod camera;
mod deferred;
mod sequencer;
mod sync;

use std::mem::size_of;
use std::sync::Arc;

use log::{debug, info, trace};

pub use billboard::{BillboardRenderer, CameraUniform};
pub use buffers::{EmitterBufferBatch, SnapshotLayout};
pub use camera::Camera;
pub use deferred::{Epoch, ReleaseQueue, ScopedBuffer};
pub use sequencer::ComputeStageSequencer;
pub use sync::SynchronizationController;

use crate::backend::{ParticleBackend, ParticleSnapshot};
use crate::config::EngineConfig;
use crate::counter::ParticleCounter;
use crate::emitter::EmitterGpu;
use crate::error::{ConfigError, GpuError, ParticleError};
use crate::particle::{GpuParticle, RenderParticle};
use crate::stages::{Command, Stage, TickParams, TICK_PLAN};
use crate::EmitterId;

/// Device and queue used by the particle subsystem.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Request an adapter and device without a surface.
    pub async fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let info = adapter.get_info();
        info!("Using adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Particle Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        Ok(Self { device, queue })
    }

    /// Blocking form of [`GpuContext::new`].
    pub fn headless() -> Result<Self, GpuError> {
        pollster::block_on(Self::new())
    }

    /// Share a device the application already owns.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }
}

/// Layout of the billboard instance bind group (group 1): one read-only
/// storage buffer of [`RenderParticle`] visible to the vertex stage.
pub fn instance_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Billboard Instance Layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

/// Runs emitters on a wgpu device.
pub struct GpuBackend {
    context: GpuContext,
    sequencer: ComputeStageSequencer,
    sync: SynchronizationController,
    release: Arc<ReleaseQueue>,
    instance_layout: wgpu::BindGroupLayout,
}

impl GpuBackend {
    /// Build the pipelines for `config`. The configuration is validated
    /// first, and its workgroup size is checked against the device limits.
    pub fn new(context: GpuContext, config: &EngineConfig) -> Result<Self, ParticleError> {
        config.validate()?;
        check_workgroup_size(&context.device, config.workgroup_size)?;

        let sequencer = ComputeStageSequencer::new(&context.device, config.workgroup_size);
        let release = ReleaseQueue::new();
        let sync = SynchronizationController::new(config.fence_timeout(), Arc::clone(&release));
        let instance_layout = instance_layout(&context.device);
        Ok(Self {
            context,
            sequencer,
            sync,
            release,
            instance_layout,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.context.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.context.queue
    }

    pub fn instance_layout(&self) -> &wgpu::BindGroupLayout {
        &self.instance_layout
    }

    pub fn sync(&self) -> &SynchronizationController {
        &self.sync
    }

    /// Buffers dropped but not yet released.
    pub fn pending_releases(&self) -> usize {
        self.release.len()
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

impl ParticleBackend for GpuBackend {
    type Batch = EmitterBufferBatch;

    fn name(&self) -> &'static str {
        "gpu"
    }

    fn workgroup_size(&self) -> u32 {
        self.sequencer.workgroup_size()
    }

    fn create_batch(
        &mut self,
        id: EmitterId,
        capacity: u32,
        emitter: &EmitterGpu,
    ) -> Result<EmitterBufferBatch, ParticleError> {
        let (mut batch, mut staging) = EmitterBufferBatch::new(
            &self.context.device,
            &self.sequencer,
            &self.instance_layout,
            &self.release,
            id,
            capacity,
            emitter,
        )?;

        let mut encoder = self.encoder("Particle Initial Upload");
        batch.record_initial_upload(&mut encoder, &staging);
        let epoch = self.sync.submit_and_wait(
            &self.context.device,
            &self.context.queue,
            encoder,
            "initial upload",
        )?;
        batch.touch(epoch);
        staging.touch(epoch);

        debug!("gpu: created batch for emitter {} ({} slots)", id, capacity);
        Ok(batch)
    }

    fn write_descriptor(&mut self, batch: &mut EmitterBufferBatch, emitter: &EmitterGpu) {
        self.context
            .queue
            .write_buffer(batch.descriptor(), 0, bytemuck::bytes_of(emitter));
    }

    fn run_tick(
        &mut self,
        batch: &mut EmitterBufferBatch,
        params: &TickParams,
    ) -> Result<ParticleCounter, ParticleError> {
        self.context
            .queue
            .write_buffer(batch.params(), 0, bytemuck::bytes_of(params));

        let mut encoder = self.encoder("Particle Tick");
        let mut counter = None;

        for command in TICK_PLAN.commands() {
            match *command {
                Command::Dispatch(stage) => {
                    self.sequencer.dispatch(&mut encoder, stage, batch);
                    if stage == Stage::Kickoff {
                        batch.flip();
                    }
                }
                Command::DispatchIndirect { stage, offset } => {
                    self.sequencer.dispatch_indirect(&mut encoder, stage, batch, offset);
                }
                Command::Barrier(ref barrier) => self.sequencer.barrier(barrier),
                Command::FenceWait(stage) => {
                    let recorded = std::mem::replace(&mut encoder, self.encoder("Particle Tick"));
                    let epoch = self.sync.submit_and_wait(
                        &self.context.device,
                        &self.context.queue,
                        recorded,
                        stage,
                    )?;
                    batch.touch(epoch);
                }
                Command::CopyCounter => batch.record_counter_copy(&mut encoder),
                Command::ReadCounter => {
                    counter = Some(
                        self.sync
                            .read_counter(&self.context.device, batch.counter_host())?,
                    );
                }
            }
        }

        let counter = counter.ok_or(ParticleError::DeviceLost {
            stage: "counter readback",
            reason: "tick plan never read the counter".into(),
        })?;

        if counter.alive_flip_bit != batch.generation() {
            return Err(ParticleError::DeviceLost {
                stage: "kickoff",
                reason: format!(
                    "device generation {} disagrees with host generation {}",
                    counter.alive_flip_bit,
                    batch.generation()
                ),
            });
        }

        trace!("gpu: emitter {} counter {:?}", batch.id(), counter.counts());
        Ok(counter)
    }

    fn render_index(&self, batch: &EmitterBufferBatch) -> u32 {
        batch.output_index()
    }

    fn read_snapshot(
        &mut self,
        batch: &EmitterBufferBatch,
    ) -> Result<ParticleSnapshot, ParticleError> {
        let mut encoder = self.encoder("Particle Snapshot");
        let mut readback =
            batch.record_snapshot(&self.context.device, &self.release, &mut encoder);
        let epoch = self.sync.submit_and_wait(
            &self.context.device,
            &self.context.queue,
            encoder,
            "snapshot copy",
        )?;
        readback.touch(epoch);

        let bytes = self
            .sync
            .read_bytes(&self.context.device, &readback, "snapshot readback")?;
        decode_snapshot(&bytes, batch.capacity())
    }

    fn destroy_batch(&mut self, batch: EmitterBufferBatch) {
        let id = batch.id();
        drop(batch);
        let freed = self.release.collect(self.sync.completed());
        debug!("gpu: destroyed emitter {} ({} buffers released now)", id, freed);
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        self.sync.wait_idle(&self.context.device);
        let freed = self.release.drain();
        trace!("gpu: released {} buffers on shutdown", freed);
    }
}

fn check_workgroup_size(device: &wgpu::Device, size: u32) -> Result<(), ConfigError> {
    let limits = device.limits();
    let max = limits
        .max_compute_workgroup_size_x
        .min(limits.max_compute_invocations_per_workgroup);
    if size == 0 || size > max {
        return Err(ConfigError::Invalid {
            field: "workgroup_size",
            reason: format!("{} is outside 1..={} on this device", size, max),
        });
    }
    Ok(())
}

fn read_pods<T: bytemuck::Pod>(bytes: &[u8], offset: u64, count: u32) -> Vec<T> {
    let start = offset as usize;
    let end = start + count as usize * size_of::<T>();
    bytes
        .get(start..end)
        .unwrap_or(&[])
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

fn decode_snapshot(bytes: &[u8], capacity: u32) -> Result<ParticleSnapshot, ParticleError> {
    let layout = SnapshotLayout::new(capacity);
    if (bytes.len() as u64) < layout.total {
        return Err(ParticleError::DeviceLost {
            stage: "snapshot readback",
            reason: format!("mapped {} bytes, expected {}", bytes.len(), layout.total),
        });
    }

    let counter: ParticleCounter =
        bytemuck::pod_read_unaligned(&bytes[..size_of::<ParticleCounter>()]);
    let dead_count = counter.dead_count.min(capacity);
    let alive_count = counter.alive_count_after_sim.min(capacity);

    Ok(ParticleSnapshot {
        counter,
        particles: read_pods::<GpuParticle>(bytes, layout.particles, capacity),
        dead: read_pods::<u32>(bytes, layout.dead, dead_count),
        alive: read_pods::<u32>(bytes, layout.alive, alive_count),
        render: read_pods::<RenderParticle>(bytes, layout.render, alive_count),
    })
}
