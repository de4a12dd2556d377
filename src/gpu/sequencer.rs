//! Compute pipelines and per-stage recording.
//!
//! Each stage is recorded in its own compute pass. wgpu orders storage
//! writes of one pass before reads in the next and tracks the transition of
//! the indirect buffer from storage to indirect usage, which is what the
//! plan's barriers ask for.

use log::trace;

use super::buffers::EmitterBufferBatch;
use crate::shaders;
use crate::stages::{Barrier, Stage};

/// The three kernels and the bind group layouts they share.
pub struct ComputeStageSequencer {
    workgroup_size: u32,
    kickoff_layout: wgpu::BindGroupLayout,
    particle_layout: wgpu::BindGroupLayout,
    kickoff_pipeline: wgpu::ComputePipeline,
    emit_pipeline: wgpu::ComputePipeline,
    simulate_pipeline: wgpu::ComputePipeline,
}

impl ComputeStageSequencer {
    pub fn new(device: &wgpu::Device, workgroup_size: u32) -> Self {
        let kickoff_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Kickoff Layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, false),
                storage_entry(2, false),
            ],
        });

        let particle_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Layout"),
            entries: &[
                uniform_entry(0),
                uniform_entry(1),
                storage_entry(2, false), // counter
                storage_entry(3, false), // particles
                storage_entry(4, false), // dead list
                storage_entry(5, false), // alive list 0
                storage_entry(6, false), // alive list 1
                storage_entry(7, false), // render 0
                storage_entry(8, false), // render 1
            ],
        });

        let kickoff_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Kickoff Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::kickoff_wgsl(workgroup_size).into()),
        });
        let particle_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::particle_wgsl(workgroup_size).into()),
        });

        let kickoff_pipeline = create_compute_pipeline(
            device,
            &kickoff_layout,
            &kickoff_shader,
            Stage::Kickoff,
        );
        let emit_pipeline =
            create_compute_pipeline(device, &particle_layout, &particle_shader, Stage::Emit);
        let simulate_pipeline =
            create_compute_pipeline(device, &particle_layout, &particle_shader, Stage::Simulate);

        Self {
            workgroup_size,
            kickoff_layout,
            particle_layout,
            kickoff_pipeline,
            emit_pipeline,
            simulate_pipeline,
        }
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    pub fn kickoff_layout(&self) -> &wgpu::BindGroupLayout {
        &self.kickoff_layout
    }

    pub fn particle_layout(&self) -> &wgpu::BindGroupLayout {
        &self.particle_layout
    }

    fn pipeline(&self, stage: Stage) -> &wgpu::ComputePipeline {
        match stage {
            Stage::Kickoff => &self.kickoff_pipeline,
            Stage::Emit => &self.emit_pipeline,
            Stage::Simulate => &self.simulate_pipeline,
        }
    }

    /// Record a single-workgroup dispatch of `stage`.
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        stage: Stage,
        batch: &EmitterBufferBatch,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(stage.label()),
            timestamp_writes: None,
        });
        pass.set_pipeline(self.pipeline(stage));
        pass.set_bind_group(0, batch.bind_group(stage), &[]);
        pass.dispatch_workgroups(1, 1, 1);
    }

    /// Record a dispatch of `stage` sized by the batch's indirect buffer.
    pub fn dispatch_indirect(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        stage: Stage,
        batch: &EmitterBufferBatch,
        offset: u64,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(stage.label()),
            timestamp_writes: None,
        });
        pass.set_pipeline(self.pipeline(stage));
        pass.set_bind_group(0, batch.bind_group(stage), &[]);
        pass.dispatch_workgroups_indirect(batch.indirect(), offset);
    }

    /// Pass boundaries already order the writes; this only traces.
    pub fn barrier(&self, barrier: &Barrier) {
        trace!(
            "barrier {:?} -> {:?} over {:?}",
            barrier.src,
            barrier.dst,
            barrier.buffers
        );
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_compute_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    shader: &wgpu::ShaderModule,
    stage: Stage,
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(stage.label()),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(stage.label()),
        layout: Some(&pipeline_layout),
        module: shader,
        entry_point: Some(stage.entry_point()),
        compilation_options: Default::default(),
        cache: None,
    })
}
