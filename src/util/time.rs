//! Tick clock shared by the host loop and the client mirrors

use std::time::{Duration, Instant};

/// Simulation and network ticks per second
pub const TICKS_PER_SECOND: u32 = 60;

/// Fixed simulation step in seconds
pub fn tick_delta() -> f32 {
    1.0 / TICKS_PER_SECOND as f32
}

/// Wall-clock length of one tick, for the session interval
pub fn tick_duration() -> Duration {
    Duration::from_micros(1_000_000 / TICKS_PER_SECOND as u64)
}

/// Wall-clock stopwatch for session duration
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
