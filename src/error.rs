//! Error types for cinder.
//!
//! GPU context creation, emitter lifetime and the per-tick synchronization
//! round trip all report through these types. Lookup errors and rejected
//! tick deltas leave emitters untouched; every other variant of
//! [`ParticleError`] is fatal for the emitter it concerns.

use thiserror::Error;

use crate::EmitterId;

/// Errors that can occur while creating the GPU context.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    #[error("No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support.")]
    NoAdapter,
    /// Failed to create GPU device.
    #[error("Failed to create GPU device: {0}")]
    DeviceCreation(#[from] wgpu::RequestDeviceError),
}

/// Errors raised by the particle subsystem.
#[derive(Debug, Error)]
pub enum ParticleError {
    /// A buffer or queue allocation failed; the emitter cannot exist.
    #[error("Resource exhausted while creating emitter {id}: {reason}")]
    ResourceExhausted { id: EmitterId, reason: String },

    /// A fence wait exceeded its bound. Treated as device loss.
    #[error("Device timeout after {waited_ms} ms waiting for {stage}")]
    DeviceTimeout { stage: &'static str, waited_ms: u64 },

    /// The device was lost or a readback mapping failed.
    #[error("Device lost during {stage}: {reason}")]
    DeviceLost { stage: &'static str, reason: String },

    /// The counter snapshot broke the dead/alive partition of the slots.
    #[error("Counter invariant broken for emitter {id}: dead {dead} + alive {alive} != capacity {capacity}")]
    InvariantBroken {
        id: EmitterId,
        dead: u32,
        alive: u32,
        capacity: u32,
    },

    /// The emitter previously hit a fatal error and no longer simulates.
    #[error("Emitter {0} has failed and no longer simulates")]
    EmitterFailed(EmitterId),

    /// No emitter with this id exists.
    #[error("Unknown emitter {0}")]
    UnknownEmitter(EmitterId),

    /// An emitter with this id already exists.
    #[error("Emitter {0} already exists")]
    EmitterExists(EmitterId),

    /// The tick delta was negative, NaN or infinite. Nothing was ticked.
    #[error("Invalid tick delta {0}: must be finite and non-negative")]
    InvalidDelta(f32),

    /// The engine configuration is unusable on this backend.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// GPU context creation failed.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}

impl ParticleError {
    /// Whether the error ends the emitter's life (everything but lookup
    /// errors and rejected deltas).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ParticleError::UnknownEmitter(_)
                | ParticleError::EmitterExists(_)
                | ParticleError::InvalidDelta(_)
        )
    }
}

/// Errors loading configuration or emitter presets.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read file from disk.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file was not valid JSON for the expected type.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value was out of its accepted range.
    #[error("Invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors that can occur during texture loading.
#[derive(Debug, Error)]
pub enum TextureError {
    /// Failed to load image file.
    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),
    /// RGBA data length did not match the dimensions.
    #[error("RGBA data size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}
