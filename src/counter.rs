//! Per-emitter counter bookkeeping and indirect dispatch arguments.
//!
//! The counter lives in a device buffer written by all three kernels and is
//! copied into a host-visible mirror once per tick. Layouts here match the
//! WGSL structs in [`crate::shaders`] byte for byte.

use bytemuck::{Pod, Zeroable};

/// Dead/alive bookkeeping for one emitter.
///
/// After every completed tick `dead_count + alive_count_after_sim == capacity`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ParticleCounter {
    /// Number of free slots in the dead list.
    pub dead_count: u32,
    /// Alive particles entering Simulate this tick.
    pub alive_count: u32,
    /// Alive particles after this tick (emitted + survivors).
    pub alive_count_after_sim: u32,
    /// Particles Kickoff allowed Emit to spawn this tick.
    pub emit_count: u32,
    /// Generation bit selecting the current alive list. Toggled by Kickoff.
    pub alive_flip_bit: u32,
    pub _pad: [u32; 3],
}

impl ParticleCounter {
    /// Counter for a freshly created emitter: every slot dead.
    pub fn new(capacity: u32) -> Self {
        Self {
            dead_count: capacity,
            ..Self::zeroed()
        }
    }

    /// Whether the dead/alive partition covers exactly `capacity` slots.
    pub fn is_consistent(&self, capacity: u32) -> bool {
        self.dead_count as u64 + self.alive_count_after_sim as u64 == capacity as u64
    }

    /// Counts that matter for comparisons, ignoring the generation bit.
    pub fn counts(&self) -> [u32; 4] {
        [
            self.dead_count,
            self.alive_count,
            self.alive_count_after_sim,
            self.emit_count,
        ]
    }
}

/// Arguments of one indirect compute dispatch, `[x, y, z]` workgroups.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchArgs {
    pub fn linear(groups: u32) -> Self {
        Self {
            x: groups,
            y: 1,
            z: 1,
        }
    }

    /// Total workgroups.
    pub fn groups(&self) -> u32 {
        self.x * self.y * self.z
    }
}

/// Written by Kickoff, consumed by the Emit and Simulate indirect dispatches.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectArgs {
    pub emit: DispatchArgs,
    pub simulate: DispatchArgs,
    pub alive_flip_bit: u32,
    pub _pad: u32,
}

impl IndirectArgs {
    /// Byte offset of the Emit dispatch arguments.
    pub const EMIT_OFFSET: u64 = 0;
    /// Byte offset of the Simulate dispatch arguments.
    pub const SIMULATE_OFFSET: u64 = std::mem::size_of::<DispatchArgs>() as u64;
}

/// Number of workgroups needed to cover `count` invocations.
#[inline]
pub fn group_count(count: u32, workgroup_size: u32) -> u32 {
    count.div_ceil(workgroup_size)
}

/// The Kickoff kernel, as run by the host reference backend.
///
/// Mirrors `kickoff` in the WGSL: bounds the spawn request by the dead
/// count, promotes last tick's survivors to the current alive count, sizes
/// both indirect dispatches and flips the alive generation.
pub fn kickoff(
    counter: &mut ParticleCounter,
    requested_spawn: u32,
    workgroup_size: u32,
) -> IndirectArgs {
    let emit = requested_spawn.min(counter.dead_count);
    let alive = counter.alive_count_after_sim;

    counter.alive_count = alive;
    counter.alive_count_after_sim = 0;
    counter.emit_count = emit;
    counter.alive_flip_bit ^= 1;

    IndirectArgs {
        emit: DispatchArgs::linear(group_count(emit, workgroup_size)),
        simulate: DispatchArgs::linear(group_count(alive, workgroup_size)),
        alive_flip_bit: counter.alive_flip_bit,
        _pad: 0,
    }
}

/// A pair of resources selected by a generation bit.
///
/// `current` is read this tick, `next` is written; [`PingPong::flip`] swaps
/// them and is called exactly once per tick.
#[derive(Debug)]
pub struct PingPong<T> {
    slots: [T; 2],
    generation: u32,
}

impl<T> PingPong<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [a, b],
            generation: 0,
        }
    }

    /// Current generation bit (0 or 1).
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Toggle the generation bit.
    pub fn flip(&mut self) {
        self.generation ^= 1;
    }

    /// The resource read this tick.
    pub fn current(&self) -> &T {
        &self.slots[self.generation as usize]
    }

    /// The resource written this tick.
    pub fn next(&self) -> &T {
        &self.slots[(self.generation ^ 1) as usize]
    }

    /// Both resources, indexed by generation bit.
    pub fn both(&self) -> (&T, &T) {
        (&self.slots[0], &self.slots[1])
    }

    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut T)) {
        self.slots.iter_mut().for_each(&mut f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<ParticleCounter>(), 32);
        assert_eq!(std::mem::size_of::<DispatchArgs>(), 12);
        assert_eq!(std::mem::size_of::<IndirectArgs>(), 32);
        assert_eq!(IndirectArgs::SIMULATE_OFFSET, 12);
    }

    #[test]
    fn new_counter_has_every_slot_dead() {
        let c = ParticleCounter::new(1024);
        assert_eq!(c.dead_count, 1024);
        assert_eq!(c.alive_count_after_sim, 0);
        assert!(c.is_consistent(1024));
    }

    #[test]
    fn kickoff_bounds_spawn_by_dead_count() {
        let mut c = ParticleCounter::new(1024);
        let args = kickoff(&mut c, 2000, 256);
        assert_eq!(c.emit_count, 1024);
        assert_eq!(args.emit, DispatchArgs::linear(4));
        assert_eq!(args.simulate.groups(), 0);
    }

    #[test]
    fn kickoff_promotes_survivors_and_flips() {
        let mut c = ParticleCounter {
            dead_count: 924,
            alive_count_after_sim: 100,
            ..ParticleCounter::zeroed()
        };
        let args = kickoff(&mut c, 0, 64);
        assert_eq!(c.alive_count, 100);
        assert_eq!(c.alive_count_after_sim, 0);
        assert_eq!(c.emit_count, 0);
        assert_eq!(args.simulate, DispatchArgs::linear(2));
        assert_eq!(args.alive_flip_bit, 1);

        let args = kickoff(&mut c, 0, 64);
        assert_eq!(args.alive_flip_bit, 0);
    }

    #[test]
    fn group_count_rounds_up() {
        assert_eq!(group_count(0, 256), 0);
        assert_eq!(group_count(1, 256), 1);
        assert_eq!(group_count(256, 256), 1);
        assert_eq!(group_count(257, 256), 2);
    }

    #[test]
    fn ping_pong_swaps_roles() {
        let mut pair = PingPong::new("a", "b");
        assert_eq!(*pair.current(), "a");
        assert_eq!(*pair.next(), "b");
        pair.flip();
        assert_eq!(*pair.current(), "b");
        assert_eq!(*pair.next(), "a");
        assert_eq!(pair.generation(), 1);
    }
}
