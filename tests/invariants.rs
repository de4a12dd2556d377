//! Randomized tick schedules checked against the counter invariants.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cinder::emitter::EmitterDescriptor;
use cinder::host::HostBackend;
use cinder::{EmitterRegistry, EngineConfig};

fn run_schedule(seed: u64, workgroup_size: u32, capacity: u32) {
    let mut rng = StdRng::seed_from_u64(seed);
    let config = EngineConfig::default()
        .with_capacity(capacity)
        .with_workgroup_size(workgroup_size);
    let mut reg = EmitterRegistry::new(HostBackend::new(workgroup_size), config);

    let descriptor = EmitterDescriptor::new()
        .with_lifetime(0.05..0.6)
        .with_seed(seed);
    reg.create_emitter(0, descriptor).unwrap();

    for step in 0..60 {
        let dead_before = reg.counter(0).unwrap().dead_count;
        let requested = rng.gen_range(0..capacity * 2);
        let dt = rng.gen_range(0.0..0.2f32);

        reg.request_spawn(0, requested).unwrap();
        reg.tick(&[0], dt).unwrap();

        let counter = reg.counter(0).unwrap();
        assert!(
            counter.is_consistent(capacity),
            "seed {} step {}: {:?}",
            seed,
            step,
            counter
        );
        assert_eq!(counter.emit_count, requested.min(dead_before));

        if step % 10 == 0 {
            let snap = reg.debug_particles(0).unwrap();
            assert!(snap.is_partition(), "seed {} step {}", seed, step);
            assert!(snap.alive.iter().all(|&s| snap.particles[s as usize].life > 0.0));
        }
    }
}

#[test]
fn test_random_schedules_keep_the_partition() {
    for seed in 0..8 {
        run_schedule(seed, 64, 512);
    }
}

#[test]
fn test_odd_workgroup_sizes() {
    run_schedule(100, 1, 37);
    run_schedule(101, 7, 300);
    run_schedule(102, 256, 1000);
}

#[test]
fn test_many_emitters_tick_independently() {
    let mut rng = StdRng::seed_from_u64(7);
    let config = EngineConfig::default().with_capacity(128);
    let mut reg = EmitterRegistry::new(HostBackend::new(32), config);
    for id in 0..6 {
        reg.create_emitter(id, EmitterDescriptor::new().with_lifetime(0.1..0.4))
            .unwrap();
    }

    for _ in 0..40 {
        let ids: Vec<u32> = (0..6).filter(|_| rng.gen_bool(0.6)).collect();
        for &id in &ids {
            reg.request_spawn(id, rng.gen_range(0..200)).unwrap();
        }
        reg.tick(&ids, 0.05).unwrap();

        for (id, output) in reg.outputs() {
            let counter = reg.counter(id).unwrap();
            assert!(counter.is_consistent(128));
            assert_eq!(output.alive_count, counter.alive_count_after_sim);
        }
    }
}
