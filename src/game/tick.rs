//! Adaptive broadcast rate

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Player-count bands: below the bound, use the rate
const BANDS: [(usize, u32); 5] = [(50, 128), (100, 100), (200, 60), (300, 40), (500, 30)];

/// Rate used once every band is exceeded
pub const MIN_TICK_HZ: u32 = 20;

pub const MAX_TICK_HZ: u32 = 128;

/// Broadcast rate for a given number of connected players
pub fn hz_for_players(players: usize) -> u32 {
    BANDS
        .iter()
        .find(|(bound, _)| players < *bound)
        .map(|(_, hz)| *hz)
        .unwrap_or(MIN_TICK_HZ)
}

/// Derives the broadcast interval and per-write deadline from load
#[derive(Debug)]
pub struct TickController {
    hz: AtomicU32,
}

impl TickController {
    pub fn new() -> Self {
        Self {
            hz: AtomicU32::new(MAX_TICK_HZ),
        }
    }

    /// Recompute the rate for `players` connections and return it
    pub fn update(&self, players: usize) -> u32 {
        let hz = hz_for_players(players);
        self.hz.store(hz, Ordering::Relaxed);
        hz
    }

    pub fn current_hz(&self) -> u32 {
        self.hz.load(Ordering::Relaxed)
    }

    pub fn current_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.current_hz().max(1)))
    }

    /// Upper bound on a single socket write, `1000 / Hz` ms but at least 1 ms
    pub fn write_deadline(&self) -> Duration {
        let ms = 1_000 / u64::from(self.current_hz().max(1));
        Duration::from_millis(ms.max(1))
    }
}

impl Default for TickController {
    fn default() -> Self {
        Self::new()
    }
}
