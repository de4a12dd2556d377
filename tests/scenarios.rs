//! End-to-end emitter scenarios on the host backend.

use cinder::emitter::EmitterDescriptor;
use cinder::host::HostBackend;
use cinder::{EmitterRegistry, EngineConfig};

const CAPACITY: u32 = 1024;

fn registry() -> EmitterRegistry<HostBackend> {
    let config = EngineConfig::default().with_capacity(CAPACITY);
    EmitterRegistry::new(HostBackend::new(config.workgroup_size), config)
}

fn with_emitter(descriptor: EmitterDescriptor) -> EmitterRegistry<HostBackend> {
    let mut reg = registry();
    reg.create_emitter(0, descriptor).expect("emitter should be created");
    reg
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_fresh_emitter_is_all_dead() {
    let reg = with_emitter(EmitterDescriptor::new());
    let counter = reg.counter(0).unwrap();
    assert_eq!(counter.dead_count, CAPACITY);
    assert_eq!(counter.alive_count_after_sim, 0);
    assert_eq!(reg.render_output(0).unwrap().alive_count, 0);
}

#[test]
fn test_single_burst() {
    let mut reg = with_emitter(EmitterDescriptor::new());
    reg.request_spawn(0, 100).unwrap();
    reg.tick(&[0], 0.001).unwrap();

    let counter = reg.counter(0).unwrap();
    assert_eq!(counter.emit_count, 100);
    assert_eq!(counter.alive_count_after_sim, 100);
    assert_eq!(counter.dead_count, CAPACITY - 100);
    assert_eq!(reg.render_output(0).unwrap().alive_count, 100);
}

#[test]
fn test_everything_expires() {
    let mut reg = with_emitter(EmitterDescriptor::new().with_lifetime(1.0..2.0));
    reg.request_spawn(0, 100).unwrap();
    reg.tick(&[0], 0.001).unwrap();

    let mut ticks = 0;
    while reg.counter(0).unwrap().alive_count_after_sim > 0 {
        reg.tick(&[0], 0.5).unwrap();
        ticks += 1;
        assert!(ticks <= 10, "particles outlived their lifetime");
    }

    let counter = reg.counter(0).unwrap();
    assert_eq!(counter.dead_count, CAPACITY);
    assert_eq!(reg.render_output(0).unwrap().alive_count, 0);
}

#[test]
fn test_oversized_request_is_clamped() {
    let mut reg = with_emitter(EmitterDescriptor::new());
    reg.request_spawn(0, 2000).unwrap();
    reg.tick(&[0], 0.001).unwrap();

    let counter = reg.counter(0).unwrap();
    assert_eq!(counter.emit_count, CAPACITY);
    assert_eq!(counter.alive_count_after_sim, CAPACITY);
    assert_eq!(counter.dead_count, 0);

    // A full pool cannot emit more.
    reg.request_spawn(0, 10).unwrap();
    reg.tick(&[0], 0.001).unwrap();
    assert_eq!(reg.counter(0).unwrap().emit_count, 0);
    assert_eq!(reg.counter(0).unwrap().alive_count_after_sim, CAPACITY);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_idle_tick_changes_nothing() {
    let mut reg = with_emitter(EmitterDescriptor::new());
    reg.tick(&[0], 0.016).unwrap();
    let before = reg.counter(0).unwrap().counts();
    reg.tick(&[0], 0.016).unwrap();
    assert_eq!(reg.counter(0).unwrap().counts(), before);
    assert_eq!(before, [CAPACITY, 0, 0, 0]);
}

#[test]
fn test_emitted_particles_wait_a_tick() {
    let mut reg = with_emitter(EmitterDescriptor::new());
    reg.request_spawn(0, 50).unwrap();
    reg.tick(&[0], 0.01).unwrap();
    assert_eq!(reg.counter(0).unwrap().alive_count, 0);

    reg.tick(&[0], 0.01).unwrap();
    let counter = reg.counter(0).unwrap();
    assert_eq!(counter.alive_count, 50);
    assert_eq!(counter.emit_count, 0);
}

#[test]
fn test_life_only_decreases_and_slots_recycle() {
    let dt = 0.3;
    let mut reg = with_emitter(EmitterDescriptor::new().with_lifetime(0.5..1.5));
    reg.request_spawn(0, 200).unwrap();
    reg.tick(&[0], dt).unwrap();

    let mut previous = reg.debug_particles(0).unwrap();
    assert!(previous.is_partition());

    for _ in 0..8 {
        reg.tick(&[0], dt).unwrap();
        let snap = reg.debug_particles(0).unwrap();
        assert!(snap.is_partition());

        for &slot in &previous.alive {
            let before = previous.particles[slot as usize].life;
            let after = snap.particles[slot as usize].life;
            assert!(after < before, "slot {} did not age", slot);
            if snap.alive.contains(&slot) {
                assert!(after > 0.0);
            } else {
                assert!(snap.dead.contains(&slot));
                assert!(after <= 0.0);
            }
        }
        previous = snap;
    }
    assert!(previous.alive.is_empty());
}

#[test]
fn test_render_buffer_matches_alive_list() {
    let mut reg = with_emitter(EmitterDescriptor::new());
    reg.request_spawn(0, 64).unwrap();
    reg.tick(&[0], 0.01).unwrap();
    reg.request_spawn(0, 16).unwrap();
    reg.tick(&[0], 0.01).unwrap();

    let snap = reg.debug_particles(0).unwrap();
    assert_eq!(snap.alive.len(), 80);
    assert_eq!(snap.render.len(), 80);
    for (render, &slot) in snap.render.iter().zip(&snap.alive) {
        assert_eq!(render.position, snap.particles[slot as usize].position);
    }
}

#[test]
fn test_destroyed_emitter_frees_its_output() {
    let mut reg = with_emitter(EmitterDescriptor::new());
    reg.request_spawn(0, 10).unwrap();
    reg.tick(&[0], 0.01).unwrap();
    reg.destroy_emitter(0).unwrap();

    assert!(!reg.contains(0));
    assert!(reg.render_output(0).is_none());
    assert!(reg.destroy_emitter(0).is_err());

    // The id can be reused.
    reg.create_emitter(0, EmitterDescriptor::new()).unwrap();
    assert_eq!(reg.counter(0).unwrap().dead_count, CAPACITY);
}

#[test]
fn test_rate_driven_spawning() {
    let mut reg = with_emitter(EmitterDescriptor::new().with_rate(100.0).with_lifetime(10.0..10.0));
    for _ in 0..10 {
        reg.tick(&[0], 0.1).unwrap();
    }
    let alive = reg.counter(0).unwrap().alive_count_after_sim;
    assert!((99..=100).contains(&alive), "alive = {}", alive);
}
