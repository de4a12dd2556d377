//! Headless demo: a few emitters ticking for two simulated seconds.
//!
//! ```text
//! RUST_LOG=info cargo run -- [config.json]
//! ```
//!
//! Uses the GPU when an adapter is available and the host backend otherwise.

use std::time::Duration;

use cinder::gpu::{GpuBackend, GpuContext};
use cinder::host::HostBackend;
use cinder::prelude::*;
use cinder::ParticleBackend;
use log::{error, info, warn};

const FRAMES: u32 = 120;
const FRAME_TIME: Duration = Duration::from_micros(16_667);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => match EngineConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };

    let result = match GpuContext::headless() {
        Ok(context) => GpuBackend::new(context, &config)
            .and_then(|backend| run(EmitterRegistry::new(backend, config))),
        Err(e) => {
            warn!("{}; falling back to the host backend", e);
            let backend = HostBackend::new(config.workgroup_size);
            run(EmitterRegistry::new(backend, config))
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run<B: ParticleBackend>(mut registry: EmitterRegistry<B>) -> Result<(), ParticleError> {
    registry.create_emitter(0, EmitterDescriptor::fountain(Vec3::new(0.0, -0.5, 0.0), 600.0))?;
    registry.create_emitter(1, EmitterDescriptor::fire(Vec3::new(-0.6, -0.5, 0.0), 400.0))?;
    registry.create_emitter(
        2,
        EmitterDescriptor::sparkler(Vec3::new(0.6, 0.0, 0.0), 0.0).with_capacity(512),
    )?;

    let ids: Vec<EmitterId> = registry.ids().collect();
    let mut clock = TickClock::new(registry.config().tick_rate, registry.config().max_ticks_per_frame);

    for frame in 0..FRAMES {
        if frame % 30 == 0 {
            registry.request_spawn(2, 300)?;
        }

        // Swing the fountain around the Z axis.
        let angle = (frame as f32 * 0.05).sin() * 0.4;
        registry.set_emitter_transform(0, Vec3::new(0.0, -0.5, 0.0), Quat::from_rotation_z(angle))?;

        for _ in 0..clock.advance(FRAME_TIME) {
            registry.tick(&ids, clock.tick_delta())?;
        }

        if frame % 20 == 0 {
            for (id, output) in registry.outputs() {
                info!(
                    "frame {:3} emitter {}: {:5} alive (render buffer {})",
                    frame, id, output.alive_count, output.handle.buffer_index
                );
            }
        }
    }

    for id in &ids {
        if let Some(counter) = registry.counter(*id) {
            info!(
                "emitter {} final: dead {} alive {} capacity {}",
                id,
                counter.dead_count,
                counter.alive_count_after_sim,
                registry.capacity(*id).unwrap_or(0)
            );
        }
    }
    Ok(())
}
