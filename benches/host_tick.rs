//! Benchmarks for the host backend and CPU-side helpers.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cinder::emitter::EmitterDescriptor;
use cinder::host::HostBackend;
use cinder::shaders;
use cinder::stages::TICK_PLAN;
use cinder::{EmitterRegistry, EngineConfig};

fn steady_registry(capacity: u32) -> EmitterRegistry<HostBackend> {
    let config = EngineConfig::default().with_capacity(capacity);
    let mut registry = EmitterRegistry::new(HostBackend::new(config.workgroup_size), config);
    let descriptor = EmitterDescriptor::new().with_lifetime(0.5..1.0);
    registry.create_emitter(0, descriptor).unwrap();
    // Fill to roughly half so both Emit and Simulate have work.
    registry.request_spawn(0, capacity / 2).unwrap();
    registry.tick(&[0], 1.0 / 60.0).unwrap();
    registry
}

fn bench_host_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_tick");

    for capacity in [1_024u32, 16_384, 65_536] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &cap| {
            let mut registry = steady_registry(cap);
            b.iter(|| {
                registry.request_spawn(0, cap / 64).unwrap();
                registry.tick(black_box(&[0]), 1.0 / 60.0).unwrap();
                black_box(registry.render_output(0))
            })
        });
    }

    group.finish();
}

fn bench_many_emitters(c: &mut Criterion) {
    c.bench_function("host_tick_32_emitters", |b| {
        let config = EngineConfig::default().with_capacity(1_024);
        let mut registry = EmitterRegistry::new(HostBackend::new(64), config);
        for id in 0..32 {
            registry
                .create_emitter(id, EmitterDescriptor::sparkler(glam::Vec3::ZERO, 600.0))
                .unwrap();
        }
        let ids: Vec<u32> = registry.ids().collect();
        b.iter(|| registry.tick(black_box(&ids), 1.0 / 60.0).unwrap())
    });
}

fn bench_plan_and_shaders(c: &mut Criterion) {
    c.bench_function("tick_plan_validate", |b| {
        b.iter(|| black_box(TICK_PLAN.validate()))
    });

    c.bench_function("particle_wgsl", |b| {
        b.iter(|| black_box(shaders::particle_wgsl(black_box(256))))
    });
}

criterion_group!(benches, bench_host_tick, bench_many_emitters, bench_plan_and_shaders);
criterion_main!(benches);
