//! Engine-wide configuration.
//!
//! Values that are fixed for the lifetime of the subsystem: default emitter
//! capacity, compute workgroup size, the fence-wait bound and the simulation
//! tick rate. Loadable from JSON.
//!
//! # Example
//!
//! ```ignore
//! let config = EngineConfig::default()
//!     .with_capacity(4096)
//!     .with_fence_timeout_ms(500);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default particle capacity per emitter.
pub const DEFAULT_CAPACITY: u32 = 1024;

/// Threads per compute workgroup for the Emit and Simulate kernels.
pub const DEFAULT_WORKGROUP_SIZE: u32 = 256;

/// Subsystem configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum particles per emitter when the descriptor does not say otherwise.
    pub capacity: u32,
    /// Invocations per workgroup for the Emit and Simulate kernels.
    pub workgroup_size: u32,
    /// Bound on each fence wait before the device is declared lost.
    pub fence_timeout_ms: u64,
    /// Simulation ticks per second (independent from the frame rate).
    pub tick_rate: f32,
    /// Maximum number of ticks run for one frame before dropping time.
    pub max_ticks_per_frame: u32,
    /// Upper bound on emitter ids.
    pub max_emitters: u32,
    /// Check `dead + alive_after_sim == capacity` on every readback.
    pub verify_invariant: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            fence_timeout_ms: 2_000,
            tick_rate: 60.0,
            max_ticks_per_frame: 4,
            max_emitters: 256,
            verify_invariant: true,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a JSON string and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set the default per-emitter capacity.
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the compute workgroup size.
    pub fn with_workgroup_size(mut self, size: u32) -> Self {
        self.workgroup_size = size;
        self
    }

    /// Set the fence-wait bound in milliseconds.
    pub fn with_fence_timeout_ms(mut self, ms: u64) -> Self {
        self.fence_timeout_ms = ms;
        self
    }

    /// Set the simulation tick rate in Hz.
    pub fn with_tick_rate(mut self, hz: f32) -> Self {
        self.tick_rate = hz;
        self
    }

    /// Fence wait bound as a [`Duration`].
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "capacity",
                reason: "must be at least 1".into(),
            });
        }
        // WGSL workgroup sizes must be baked into the shader; the default
        // downlevel limit caps the x dimension at 256.
        if self.workgroup_size == 0 || self.workgroup_size > 256 {
            return Err(ConfigError::Invalid {
                field: "workgroup_size",
                reason: format!("{} is outside 1..=256", self.workgroup_size),
            });
        }
        if self.fence_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "fence_timeout_ms",
                reason: "must be non-zero".into(),
            });
        }
        if !(self.tick_rate > 0.0) {
            return Err(ConfigError::Invalid {
                field: "tick_rate",
                reason: format!("{} is not positive", self.tick_rate),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = EngineConfig::from_json(r#"{ "capacity": 4096 }"#).unwrap();
        assert_eq!(config.capacity, 4096);
        assert_eq!(config.workgroup_size, DEFAULT_WORKGROUP_SIZE);
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = EngineConfig::from_json(r#"{ "capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "capacity", .. }));
    }

    #[test]
    fn rejects_oversized_workgroup() {
        let config = EngineConfig::default().with_workgroup_size(512);
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_roundtrip_keeps_values() {
        let config = EngineConfig::default()
            .with_capacity(77)
            .with_fence_timeout_ms(9);
        let back = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
