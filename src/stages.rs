//! The per-tick stage protocol.
//!
//! One simulation tick of one emitter is a fixed sequence of commands:
//!
//! ```text
//! Dispatch(Kickoff)
//! Barrier   compute -> compute + indirect     [counter, indirect]
//! DispatchIndirect(Emit)
//! Barrier   compute -> compute                [counter, particles, dead, alive-next, render]
//! DispatchIndirect(Simulate)
//! Barrier   compute -> transfer + vertex      [counter, particles, dead, alive-next, render]
//! FenceWait("simulation")
//! CopyCounter
//! FenceWait("counter copy")
//! ReadCounter
//! ```
//!
//! Both backends walk [`TICK_PLAN`] command by command, so the ordering the
//! kernels rely on is written down once. [`StagePlan::validate`] checks that
//! every buffer written by one command is behind a barrier or fence before
//! any later command touches it.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::counter::IndirectArgs;

/// Per-tick uniform read by the kernels. 32 bytes, matches `TickParams` in WGSL.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TickParams {
    pub delta_time: f32,
    /// Spawn request before Kickoff bounds it by the dead count.
    pub requested_spawn: u32,
    /// Deterministic per-emitter seed.
    pub seed: u32,
    /// Tick number of this emitter.
    pub frame: u32,
    /// Host-generated random offsets, refreshed every tick.
    pub random_pack: [f32; 4],
}

/// The three compute kernels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Kickoff,
    Emit,
    Simulate,
}

impl Stage {
    /// WGSL entry point name.
    pub fn entry_point(self) -> &'static str {
        match self {
            Stage::Kickoff => "kickoff",
            Stage::Emit => "emit",
            Stage::Simulate => "simulate",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Kickoff => "Particle Kickoff",
            Stage::Emit => "Particle Emit",
            Stage::Simulate => "Particle Simulate",
        }
    }

    /// Buffers the stage reads.
    pub fn reads(self) -> &'static [BufferRole] {
        match self {
            Stage::Kickoff => &[BufferRole::Counter],
            Stage::Emit => &[
                BufferRole::Indirect,
                BufferRole::Counter,
                BufferRole::DeadList,
                BufferRole::Descriptor,
            ],
            Stage::Simulate => &[
                BufferRole::Indirect,
                BufferRole::Counter,
                BufferRole::AliveCurrent,
                BufferRole::Particles,
            ],
        }
    }

    /// Buffers the stage writes.
    pub fn writes(self) -> &'static [BufferRole] {
        match self {
            Stage::Kickoff => &[BufferRole::Counter, BufferRole::Indirect],
            Stage::Emit => &[
                BufferRole::Counter,
                BufferRole::Particles,
                BufferRole::AliveNext,
                BufferRole::Render,
            ],
            Stage::Simulate => &[
                BufferRole::Counter,
                BufferRole::Particles,
                BufferRole::AliveNext,
                BufferRole::DeadList,
                BufferRole::Render,
            ],
        }
    }
}

/// Buffers of an emitter batch, by role.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Counter,
    HostCounter,
    Indirect,
    Particles,
    DeadList,
    AliveCurrent,
    AliveNext,
    Render,
    Descriptor,
}

/// Pipeline scopes a barrier orders.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    Compute,
    IndirectRead,
    Transfer,
    VertexRead,
}

/// A write -> read memory barrier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Barrier {
    pub src: Scope,
    pub dst: &'static [Scope],
    pub buffers: &'static [BufferRole],
}

/// One step of a tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Direct dispatch of a single workgroup.
    Dispatch(Stage),
    /// Dispatch sized by the indirect buffer at `offset`.
    DispatchIndirect { stage: Stage, offset: u64 },
    Barrier(Barrier),
    /// Submit everything recorded so far and block until it completes.
    FenceWait(&'static str),
    /// Copy the device counter into the host-visible counter.
    CopyCounter,
    /// Map the host counter and read it.
    ReadCounter,
}

impl Command {
    fn reads(&self) -> &'static [BufferRole] {
        match self {
            Command::Dispatch(stage) | Command::DispatchIndirect { stage, .. } => stage.reads(),
            Command::CopyCounter => &[BufferRole::Counter],
            Command::ReadCounter => &[BufferRole::HostCounter],
            Command::Barrier(_) | Command::FenceWait(_) => &[],
        }
    }

    fn writes(&self) -> &'static [BufferRole] {
        match self {
            Command::Dispatch(stage) | Command::DispatchIndirect { stage, .. } => stage.writes(),
            Command::CopyCounter => &[BufferRole::HostCounter],
            Command::Barrier(_) | Command::FenceWait(_) | Command::ReadCounter => &[],
        }
    }
}

/// Ways a plan can be unsound.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("command {index} ({command}) touches {buffer:?} before a barrier covers the previous write")]
    Hazard {
        index: usize,
        command: String,
        buffer: BufferRole,
    },
    #[error("stage {0:?} is missing or out of order")]
    Order(Stage),
    #[error("plan ends with unsynchronized writes to {0:?}")]
    Unsynchronized(Vec<BufferRole>),
}

const AFTER_KICKOFF: Barrier = Barrier {
    src: Scope::Compute,
    dst: &[Scope::Compute, Scope::IndirectRead],
    buffers: &[BufferRole::Counter, BufferRole::Indirect],
};

const AFTER_EMIT: Barrier = Barrier {
    src: Scope::Compute,
    dst: &[Scope::Compute],
    buffers: &[
        BufferRole::Counter,
        BufferRole::Particles,
        BufferRole::DeadList,
        BufferRole::AliveNext,
        BufferRole::Render,
    ],
};

const AFTER_SIMULATE: Barrier = Barrier {
    src: Scope::Compute,
    dst: &[Scope::Transfer, Scope::VertexRead],
    buffers: &[
        BufferRole::Counter,
        BufferRole::Particles,
        BufferRole::DeadList,
        BufferRole::AliveNext,
        BufferRole::Render,
    ],
};

/// An ordered list of commands.
#[derive(Copy, Clone, Debug)]
pub struct StagePlan {
    commands: &'static [Command],
}

/// The tick every emitter runs.
pub const TICK_PLAN: StagePlan = StagePlan {
    commands: &[
        Command::Dispatch(Stage::Kickoff),
        Command::Barrier(AFTER_KICKOFF),
        Command::DispatchIndirect {
            stage: Stage::Emit,
            offset: IndirectArgs::EMIT_OFFSET,
        },
        Command::Barrier(AFTER_EMIT),
        Command::DispatchIndirect {
            stage: Stage::Simulate,
            offset: IndirectArgs::SIMULATE_OFFSET,
        },
        Command::Barrier(AFTER_SIMULATE),
        Command::FenceWait("simulation"),
        Command::CopyCounter,
        Command::FenceWait("counter copy"),
        Command::ReadCounter,
    ],
};

impl StagePlan {
    pub const fn new(commands: &'static [Command]) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &'static [Command] {
        self.commands
    }

    /// Check stage order and barrier coverage.
    pub fn validate(&self) -> Result<(), PlanError> {
        let expected = [Stage::Kickoff, Stage::Emit, Stage::Simulate];
        let stages: Vec<Stage> = self
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::Dispatch(s) | Command::DispatchIndirect { stage: s, .. } => Some(*s),
                _ => None,
            })
            .collect();
        for (i, stage) in expected.iter().enumerate() {
            if stages.get(i) != Some(stage) {
                return Err(PlanError::Order(*stage));
            }
        }
        if stages.len() != expected.len() {
            return Err(PlanError::Order(stages[expected.len()]));
        }

        // Buffers written since the last barrier that covers them.
        let mut pending: Vec<BufferRole> = Vec::new();
        for (index, command) in self.commands.iter().enumerate() {
            match command {
                Command::Barrier(barrier) => {
                    pending.retain(|b| !barrier.buffers.contains(b));
                    continue;
                }
                Command::FenceWait(_) => {
                    pending.clear();
                    continue;
                }
                _ => {}
            }

            let touched = command.reads().iter().chain(command.writes());
            for buffer in touched {
                if pending.contains(buffer) {
                    return Err(PlanError::Hazard {
                        index,
                        command: format!("{:?}", command),
                        buffer: *buffer,
                    });
                }
            }
            for buffer in command.writes() {
                if !pending.contains(buffer) {
                    pending.push(*buffer);
                }
            }
        }

        if pending.is_empty() {
            Ok(())
        } else {
            Err(PlanError::Unsynchronized(pending))
        }
    }
}
