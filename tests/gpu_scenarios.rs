//! Emitter scenarios on a real device.
//!
//! Every test returns early when no adapter is available, so the suite
//! still passes on machines without a GPU.

use cinder::emitter::EmitterDescriptor;
use cinder::gpu::{GpuBackend, GpuContext};
use cinder::host::HostBackend;
use cinder::{EmitterRegistry, EngineConfig, ParticleError};

const CAPACITY: u32 = 1024;

fn gpu_registry(config: EngineConfig) -> Option<EmitterRegistry<GpuBackend>> {
    match GpuContext::headless() {
        Ok(context) => {
            let backend = GpuBackend::new(context, &config).expect("config should be accepted");
            Some(EmitterRegistry::new(backend, config))
        }
        Err(e) => {
            eprintln!("skipping GPU test: {}", e);
            None
        }
    }
}

fn config() -> EngineConfig {
    EngineConfig::default().with_capacity(CAPACITY)
}

#[test]
fn test_gpu_fresh_emitter_and_burst() {
    let Some(mut reg) = gpu_registry(config()) else {
        return;
    };
    reg.create_emitter(0, EmitterDescriptor::new()).expect("emitter should be created");
    let counter = reg.counter(0).unwrap();
    assert_eq!(counter.dead_count, CAPACITY);
    assert_eq!(counter.alive_count_after_sim, 0);

    reg.request_spawn(0, 100).unwrap();
    reg.tick(&[0], 0.001).expect("tick should succeed");
    let counter = reg.counter(0).unwrap();
    assert_eq!(counter.emit_count, 100);
    assert_eq!(counter.alive_count_after_sim, 100);
    assert_eq!(counter.dead_count, CAPACITY - 100);

    let snap = reg.debug_particles(0).expect("snapshot should be readable");
    assert!(snap.is_partition());
    assert_eq!(snap.render.len(), 100);
}

#[test]
fn test_gpu_everything_expires() {
    let Some(mut reg) = gpu_registry(config()) else {
        return;
    };
    reg.create_emitter(0, EmitterDescriptor::new().with_lifetime(1.0..2.0))
        .unwrap();
    reg.request_spawn(0, 100).unwrap();
    reg.tick(&[0], 0.001).unwrap();

    for _ in 0..10 {
        reg.tick(&[0], 0.5).unwrap();
    }
    let counter = reg.counter(0).unwrap();
    assert_eq!(counter.alive_count_after_sim, 0);
    assert_eq!(counter.dead_count, CAPACITY);
}

#[test]
fn test_gpu_oversized_request_is_clamped() {
    let Some(mut reg) = gpu_registry(config()) else {
        return;
    };
    reg.create_emitter(0, EmitterDescriptor::new()).unwrap();
    reg.request_spawn(0, 2000).unwrap();
    reg.tick(&[0], 0.001).unwrap();

    let counter = reg.counter(0).unwrap();
    assert_eq!(counter.emit_count, CAPACITY);
    assert_eq!(counter.alive_count_after_sim, CAPACITY);
    assert_eq!(counter.dead_count, 0);
}

#[test]
fn test_gpu_matches_host_counts() {
    let Some(mut gpu) = gpu_registry(config()) else {
        return;
    };
    let mut host = EmitterRegistry::new(HostBackend::new(config().workgroup_size), config());

    let descriptor = EmitterDescriptor::new().with_lifetime(1.0..1.0);
    gpu.create_emitter(0, descriptor.clone()).unwrap();
    host.create_emitter(0, descriptor).unwrap();

    for step in 0..16u32 {
        let spawn = (step * 37) % 300;
        gpu.request_spawn(0, spawn).unwrap();
        host.request_spawn(0, spawn).unwrap();
        gpu.tick(&[0], 0.25).unwrap();
        host.tick(&[0], 0.25).unwrap();

        assert_eq!(
            gpu.counter(0).unwrap().counts(),
            host.counter(0).unwrap().counts(),
            "step {}",
            step
        );
        assert_eq!(
            gpu.render_output(0).unwrap().handle.buffer_index,
            host.render_output(0).unwrap().handle.buffer_index
        );
    }
}

#[test]
fn test_gpu_destroy_defers_release() {
    let Some(mut reg) = gpu_registry(config()) else {
        return;
    };
    reg.create_emitter(0, EmitterDescriptor::new()).unwrap();
    reg.request_spawn(0, 10).unwrap();
    reg.tick(&[0], 0.01).unwrap();
    reg.destroy_emitter(0).unwrap();

    // Every submission touching the batch has completed by now.
    assert_eq!(reg.backend().pending_releases(), 0);
    assert!(reg.render_output(0).is_none());
}

#[test]
fn test_gpu_rejects_unusable_workgroup_sizes() {
    for size in [0, 512, 4096] {
        let context = match GpuContext::headless() {
            Ok(context) => context,
            Err(e) => {
                eprintln!("skipping GPU test: {}", e);
                return;
            }
        };
        let config = config().with_workgroup_size(size);
        let err = GpuBackend::new(context, &config).err().expect("size should be rejected");
        assert!(matches!(err, ParticleError::InvalidConfig(_)), "{:?}", err);
    }
}

#[test]
fn test_gpu_rejects_invalid_config() {
    let Ok(context) = GpuContext::headless() else {
        return;
    };
    let config = config().with_capacity(0);
    assert!(matches!(
        GpuBackend::new(context, &config),
        Err(ParticleError::InvalidConfig(_))
    ));
}
