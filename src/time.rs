//! Fixed-rate simulation ticks decoupled from render frames.
//!
//! Emitters may tick at a lower (or higher) rate than the display. The clock
//! accumulates frame time and reports how many fixed ticks are due.
//!
//! # Example
//!
//! ```ignore
//! use cinder::time::TickClock;
//!
//! let mut clock = TickClock::new(60.0, 4);
//!
//! // Once per rendered frame:
//! let ticks = clock.update();
//! for _ in 0..ticks {
//!     registry.tick(&ids, clock.tick_delta())?;
//! }
//! ```

use std::time::{Duration, Instant};

/// Accumulator producing fixed simulation ticks.
#[derive(Debug)]
pub struct TickClock {
    /// When the last frame occurred.
    last_frame: Instant,
    /// Scaled seconds not yet consumed by ticks.
    accumulator: f32,
    /// Seconds per tick.
    tick_delta: f32,
    /// Cap on ticks per frame; excess time is dropped.
    max_ticks_per_frame: u32,
    /// Total ticks produced.
    tick_count: u64,
    /// Seconds of simulation time dropped by the cap.
    dropped: f32,
    paused: bool,
    /// Time scale multiplier (1.0 = normal speed).
    time_scale: f32,
}

impl TickClock {
    /// `tick_rate` in ticks per second.
    pub fn new(tick_rate: f32, max_ticks_per_frame: u32) -> Self {
        Self {
            last_frame: Instant::now(),
            accumulator: 0.0,
            tick_delta: 1.0 / tick_rate.max(f32::EPSILON),
            max_ticks_per_frame: max_ticks_per_frame.max(1),
            tick_count: 0,
            dropped: 0.0,
            paused: false,
            time_scale: 1.0,
        }
    }

    /// Measure the wall time since the last call and return the number of
    /// ticks due.
    pub fn update(&mut self) -> u32 {
        let now = Instant::now();
        let frame = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.advance(frame)
    }

    /// Feed an explicit frame duration. Returns the number of ticks due.
    pub fn advance(&mut self, frame: Duration) -> u32 {
        if self.paused {
            return 0;
        }

        self.accumulator += frame.as_secs_f32() * self.time_scale;

        let due = (self.accumulator / self.tick_delta).floor();
        let ticks = (due as u32).min(self.max_ticks_per_frame);
        self.accumulator -= ticks as f32 * self.tick_delta;

        // Spiral guard: whatever the cap left behind beyond one tick is lost.
        if self.accumulator >= self.tick_delta {
            let excess = self.accumulator - self.accumulator % self.tick_delta;
            self.dropped += excess;
            self.accumulator -= excess;
        }

        self.tick_count += ticks as u64;
        ticks
    }

    /// Seconds each tick advances the simulation.
    #[inline]
    pub fn tick_delta(&self) -> f32 {
        self.tick_delta
    }

    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Simulation seconds discarded because a frame exceeded the tick cap.
    #[inline]
    pub fn dropped(&self) -> f32 {
        self.dropped
    }

    /// Fraction of a tick accumulated but not yet run, in `[0, 1)`.
    #[inline]
    pub fn alpha(&self) -> f32 {
        self.accumulator / self.tick_delta
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[inline]
    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// While paused, no ticks are produced and frame time is discarded.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.last_frame = Instant::now();
            self.paused = false;
        }
    }

    pub fn toggle_pause(&mut self) {
        if self.paused {
            self.resume();
        } else {
            self.pause();
        }
    }

    /// Set time scale multiplier.
    ///
    /// - `1.0` = normal speed
    /// - `0.5` = half speed (slow motion)
    /// - `2.0` = double speed
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }

    pub fn reset(&mut self) {
        self.last_frame = Instant::now();
        self.accumulator = 0.0;
        self.tick_count = 0;
        self.dropped = 0.0;
        self.paused = false;
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(60.0, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_fixed_ticks_per_frame() {
        let mut clock = TickClock::new(100.0, 8);
        assert_eq!(clock.advance(ms(25)), 2);
        // The 5 ms left over carry into the next frames.
        assert_eq!(clock.advance(ms(3)), 0);
        assert_eq!(clock.advance(ms(3)), 1);
        assert_eq!(clock.tick_count(), 3);
    }

    #[test]
    fn test_lower_tick_rate_than_frames() {
        let mut clock = TickClock::new(30.0, 4);
        let ticks: u32 = (0..60).map(|_| clock.advance(Duration::from_secs_f32(1.0 / 60.0))).sum();
        assert!((29..=30).contains(&ticks));
    }

    #[test]
    fn test_cap_drops_time() {
        let mut clock = TickClock::new(60.0, 4);
        assert_eq!(clock.advance(Duration::from_secs(1)), 4);
        assert!(clock.dropped() > 0.9);
        assert!(clock.alpha() < 1.0);
    }

    #[test]
    fn test_pause() {
        let mut clock = TickClock::new(60.0, 4);
        clock.pause();
        assert!(clock.is_paused());
        assert_eq!(clock.advance(ms(100)), 0);
        clock.resume();
        assert_eq!(clock.advance(ms(20)), 1);
    }

    #[test]
    fn test_time_scale() {
        let mut clock = TickClock::new(10.0, 8);
        clock.set_time_scale(2.0);
        assert_eq!(clock.advance(ms(200)), 4);

        // Negative scale should clamp to 0
        clock.set_time_scale(-1.0);
        assert_eq!(clock.time_scale(), 0.0);
        assert_eq!(clock.advance(ms(500)), 0);
    }
}
