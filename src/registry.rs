//! The scene-facing emitter registry.
//!
//! [`EmitterRegistry`] owns every emitter's buffer batch and runs ticks for
//! the ids the scene asks for. Emitters tick one after another: each one
//! completes its full Kickoff/Emit/Simulate/readback round trip before the
//! next starts. After a tick the emitter exposes a [`RenderOutput`] holding
//! the render buffer handle and the exact alive count, valid until its next
//! tick.
//!
//! # Example
//!
//! ```ignore
//! use cinder::prelude::*;
//!
//! let mut registry = EmitterRegistry::new(HostBackend::default(), EngineConfig::default());
//! registry.create_emitter(0, EmitterDescriptor::fountain(Vec3::ZERO, 500.0))?;
//!
//! registry.tick(&[0], 1.0 / 60.0)?;
//! let output = registry.render_output(0).unwrap();
//! println!("{} particles alive", output.alive_count);
//! ```
//!
//! # Failure
//!
//! A fatal error (device timeout, device loss, broken counter invariant)
//! marks the emitter failed: its output is withdrawn, later ticks skip it
//! and the error is logged and returned. Other emitters keep running.

use std::collections::HashSet;

use glam::{Quat, Vec3};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::{ParticleBackend, ParticleSnapshot};
use crate::config::EngineConfig;
use crate::counter::ParticleCounter;
use crate::emitter::{EmitterDescriptor, EmitterGpu, SpawnAccumulator};
use crate::error::ParticleError;
use crate::stages::TickParams;
use crate::EmitterId;

/// Identifies the render-visible buffer an emitter's last tick wrote.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RenderHandle {
    pub emitter: EmitterId,
    /// Which of the emitter's two render buffers (0 or 1).
    pub buffer_index: u32,
}

/// What the renderer needs to draw one emitter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RenderOutput {
    pub handle: RenderHandle,
    /// Instances to draw: `alive_count_after_sim` of the last tick.
    pub alive_count: u32,
}

struct EmitterEntry<Batch> {
    descriptor: EmitterDescriptor,
    gpu: EmitterGpu,
    capacity: u32,
    batch: Batch,
    spawner: SpawnAccumulator,
    rng: StdRng,
    counter: ParticleCounter,
    output: Option<RenderOutput>,
    failed: bool,
    ticks: u32,
}

/// All emitters of one scene, driven through a [`ParticleBackend`].
pub struct EmitterRegistry<B: ParticleBackend> {
    backend: B,
    config: EngineConfig,
    emitters: Vec<Option<EmitterEntry<B::Batch>>>,
}

impl<B: ParticleBackend> EmitterRegistry<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        info!(
            "particle registry on {} backend (workgroup {}, default capacity {})",
            backend.name(),
            backend.workgroup_size(),
            config.capacity
        );
        Self {
            backend,
            config,
            emitters: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn entry(&self, id: EmitterId) -> Option<&EmitterEntry<B::Batch>> {
        self.emitters.get(id as usize).and_then(Option::as_ref)
    }

    fn entry_mut(&mut self, id: EmitterId) -> Result<&mut EmitterEntry<B::Batch>, ParticleError> {
        self.emitters
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(ParticleError::UnknownEmitter(id))
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Allocate the emitter's buffers. Every slot starts dead.
    pub fn create_emitter(
        &mut self,
        id: EmitterId,
        descriptor: EmitterDescriptor,
    ) -> Result<(), ParticleError> {
        if id >= self.config.max_emitters {
            return Err(ParticleError::ResourceExhausted {
                id,
                reason: format!("id is past max_emitters ({})", self.config.max_emitters),
            });
        }
        if self.contains(id) {
            return Err(ParticleError::EmitterExists(id));
        }

        let capacity = descriptor.capacity.unwrap_or(self.config.capacity);
        let gpu = descriptor.to_gpu();
        let batch = self
            .backend
            .create_batch(id, capacity, &gpu)
            .inspect_err(|e| error!("failed to create emitter {}: {}", id, e))?;

        let output = RenderOutput {
            handle: RenderHandle {
                emitter: id,
                buffer_index: self.backend.render_index(&batch),
            },
            alive_count: 0,
        };
        let entry = EmitterEntry {
            rng: StdRng::seed_from_u64(descriptor.seed),
            descriptor,
            gpu,
            capacity,
            batch,
            spawner: SpawnAccumulator::new(),
            counter: ParticleCounter::new(capacity),
            output: Some(output),
            failed: false,
            ticks: 0,
        };

        let index = id as usize;
        if self.emitters.len() <= index {
            self.emitters.resize_with(index + 1, || None);
        }
        self.emitters[index] = Some(entry);
        info!("created emitter {} with {} slots", id, capacity);
        Ok(())
    }

    /// Release the emitter. Its buffers are freed once in-flight work that
    /// used them has completed.
    pub fn destroy_emitter(&mut self, id: EmitterId) -> Result<(), ParticleError> {
        let entry = self
            .emitters
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or(ParticleError::UnknownEmitter(id))?;
        self.backend.destroy_batch(entry.batch);
        info!("destroyed emitter {}", id);
        Ok(())
    }

    /// Destroy every emitter with an id at or above `count`.
    pub fn set_emitter_count(&mut self, count: u32) {
        let ids: Vec<EmitterId> = self.ids().filter(|&id| id >= count).collect();
        for id in ids {
            let _ = self.destroy_emitter(id);
        }
        self.emitters.truncate(count as usize);
    }

    /// Destroy every emitter.
    pub fn clear(&mut self) {
        self.set_emitter_count(0);
    }

    // =========================================================================
    // PARAMETERS
    // =========================================================================

    /// Move the emitter. Takes effect at the next Emit.
    pub fn set_emitter_transform(
        &mut self,
        id: EmitterId,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), ParticleError> {
        let Self {
            backend, emitters, ..
        } = self;
        let entry = emitters
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(ParticleError::UnknownEmitter(id))?;

        entry.descriptor.position = position;
        entry.descriptor.rotation = rotation;
        entry.gpu.set_transform(position, rotation);
        if !entry.failed {
            backend.write_descriptor(&mut entry.batch, &entry.gpu);
        }
        Ok(())
    }

    /// Replace the emission parameters. Capacity is fixed at creation, so a
    /// different `capacity` in `descriptor` is ignored.
    pub fn set_descriptor(
        &mut self,
        id: EmitterId,
        mut descriptor: EmitterDescriptor,
    ) -> Result<(), ParticleError> {
        let Self {
            backend, emitters, ..
        } = self;
        let entry = emitters
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(ParticleError::UnknownEmitter(id))?;

        if descriptor.capacity.is_some_and(|c| c != entry.capacity) {
            warn!(
                "emitter {}: capacity is fixed at {}, ignoring new value",
                id, entry.capacity
            );
        }
        descriptor.capacity = Some(entry.capacity);
        entry.gpu = descriptor.to_gpu();
        entry.descriptor = descriptor;
        if !entry.failed {
            backend.write_descriptor(&mut entry.batch, &entry.gpu);
        }
        Ok(())
    }

    /// Ask for `count` extra particles on the emitter's next tick.
    pub fn request_spawn(&mut self, id: EmitterId, count: u32) -> Result<(), ParticleError> {
        self.entry_mut(id)?.spawner.request(count);
        Ok(())
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Advance each listed emitter by `dt` seconds.
    ///
    /// `ids` is a set: an emitter listed twice still ticks once. Unknown ids
    /// are skipped with a warning, failed emitters are skipped. A negative
    /// or non-finite `dt` is rejected before any emitter runs. Returns the
    /// first fatal error; emitters after it still tick.
    pub fn tick(&mut self, ids: &[EmitterId], dt: f32) -> Result<(), ParticleError> {
        if !dt.is_finite() || dt < 0.0 {
            warn!("tick: rejecting delta {}", dt);
            return Err(ParticleError::InvalidDelta(dt));
        }

        let mut first_error = None;
        let mut seen = HashSet::with_capacity(ids.len());

        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            let Self {
                backend,
                config,
                emitters,
            } = self;
            let Some(entry) = emitters.get_mut(id as usize).and_then(Option::as_mut) else {
                warn!("tick: unknown emitter {}", id);
                continue;
            };
            if entry.failed {
                debug!("tick: emitter {} has failed, skipping", id);
                continue;
            }

            if let Err(err) = tick_emitter(backend, config, id, entry, dt) {
                error!("emitter {} stopped: {}", id, err);
                entry.failed = true;
                entry.output = None;
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn contains(&self, id: EmitterId) -> bool {
        self.entry(id).is_some()
    }

    /// Ids of all live emitters, ascending.
    pub fn ids(&self) -> impl Iterator<Item = EmitterId> + '_ {
        self.emitters
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_some())
            .map(|(i, _)| i as EmitterId)
    }

    pub fn len(&self) -> usize {
        self.emitters.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render handle and alive count of the emitter's last tick. `None` for
    /// unknown or failed emitters.
    pub fn render_output(&self, id: EmitterId) -> Option<RenderOutput> {
        self.entry(id).and_then(|e| e.output)
    }

    /// Every emitter that currently has something to render.
    pub fn outputs(&self) -> impl Iterator<Item = (EmitterId, RenderOutput)> + '_ {
        self.emitters
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref()?.output.map(|o| (i as EmitterId, o)))
    }

    /// Counter snapshot read back by the last tick.
    pub fn counter(&self, id: EmitterId) -> Option<ParticleCounter> {
        self.entry(id).map(|e| e.counter)
    }

    pub fn capacity(&self, id: EmitterId) -> Option<u32> {
        self.entry(id).map(|e| e.capacity)
    }

    pub fn descriptor(&self, id: EmitterId) -> Option<&EmitterDescriptor> {
        self.entry(id).map(|e| &e.descriptor)
    }

    pub fn is_failed(&self, id: EmitterId) -> bool {
        self.entry(id).is_some_and(|e| e.failed)
    }

    /// Number of completed ticks of the emitter.
    pub fn tick_count(&self, id: EmitterId) -> Option<u32> {
        self.entry(id).map(|e| e.ticks)
    }

    pub fn batch(&self, id: EmitterId) -> Option<&B::Batch> {
        self.entry(id).map(|e| &e.batch)
    }

    /// Read back the emitter's particles and index lists.
    pub fn debug_particles(&mut self, id: EmitterId) -> Result<ParticleSnapshot, ParticleError> {
        let Self {
            backend, emitters, ..
        } = self;
        let entry = emitters
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or(ParticleError::UnknownEmitter(id))?;
        if entry.failed {
            return Err(ParticleError::EmitterFailed(id));
        }
        backend.read_snapshot(&entry.batch)
    }
}

impl<B: ParticleBackend> Drop for EmitterRegistry<B> {
    fn drop(&mut self) {
        self.clear();
    }
}

fn tick_emitter<B: ParticleBackend>(
    backend: &mut B,
    config: &EngineConfig,
    id: EmitterId,
    entry: &mut EmitterEntry<B::Batch>,
    dt: f32,
) -> Result<(), ParticleError> {
    let requested = entry
        .spawner
        .advance(entry.gpu.spawn_rate, entry.gpu.spawn_gap, dt);
    if requested > entry.counter.dead_count {
        warn!(
            "emitter {}: {} spawns requested, only {} free slots",
            id, requested, entry.counter.dead_count
        );
    }

    let seed = entry.descriptor.seed;
    let params = TickParams {
        delta_time: dt,
        requested_spawn: requested,
        seed: (seed ^ (seed >> 32)) as u32,
        frame: entry.ticks,
        random_pack: entry.rng.gen(),
    };

    let counter = backend.run_tick(&mut entry.batch, &params)?;
    if config.verify_invariant && !counter.is_consistent(entry.capacity) {
        return Err(ParticleError::InvariantBroken {
            id,
            dead: counter.dead_count,
            alive: counter.alive_count_after_sim,
            capacity: entry.capacity,
        });
    }

    entry.counter = counter;
    entry.ticks = entry.ticks.wrapping_add(1);
    entry.output = Some(RenderOutput {
        handle: RenderHandle {
            emitter: id,
            buffer_index: backend.render_index(&entry.batch),
        },
        alive_count: counter.alive_count_after_sim,
    });
    debug!(
        "emitter {}: emitted {} alive {} dead {}",
        id, counter.emit_count, counter.alive_count_after_sim, counter.dead_count
    );
    Ok(())
}
