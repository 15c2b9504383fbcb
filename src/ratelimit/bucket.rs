//! Leaky-bucket rate limiting for emitted lines.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// A bucket holding up to `capacity` tokens that drains one token per
/// `leak_interval`.
///
/// Pouring more than the remaining room is rejected and leaves the level
/// untouched, so a burst of up to `capacity` is admitted and anything beyond
/// that has to wait for the bucket to leak.
#[derive(Debug)]
pub struct LeakyBucket {
    capacity: u64,
    leak_interval: Duration,
    state: Mutex<Level>,
}

#[derive(Debug, Clone, Copy)]
struct Level {
    fill: f64,
    last_update: Instant,
}

impl LeakyBucket {
    pub fn new(capacity: u64, leak_interval: Duration) -> Self {
        Self {
            capacity,
            leak_interval,
            state: Mutex::new(Level {
                fill: 0.0,
                last_update: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Add `amount` tokens. Returns false (and keeps nothing) if the bucket
    /// would overflow.
    pub fn pour(&self, amount: u64) -> bool {
        let mut level = self.lock();
        self.leak(&mut level, Instant::now());

        let new_fill = level.fill + amount as f64;
        if new_fill > self.capacity as f64 {
            return false;
        }
        level.fill = new_fill;
        true
    }

    /// Tokens currently held, after leaking up to now.
    pub fn level(&self) -> f64 {
        let mut level = self.lock();
        self.leak(&mut level, Instant::now());
        level.fill
    }

    /// How long until the bucket is empty if nothing else is poured.
    pub fn time_to_drain(&self) -> Duration {
        let level = self.level();
        self.leak_interval.mul_f64(level)
    }

    /// The instant the bucket will be empty.
    pub fn drained_at(&self) -> Instant {
        let level = self.lock();
        level.last_update + self.leak_interval.mul_f64(level.fill)
    }

    fn leak(&self, level: &mut Level, now: Instant) {
        if level.fill > 0.0 {
            let elapsed = now.saturating_duration_since(level.last_update);
            let leaked = if self.leak_interval.is_zero() {
                level.fill
            } else {
                elapsed.as_secs_f64() / self.leak_interval.as_secs_f64()
            };
            level.fill = (level.fill - leaked).max(0.0);
        }
        level.last_update = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Level> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
