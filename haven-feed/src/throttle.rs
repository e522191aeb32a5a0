use std::time::Duration;

use tokio::time::Instant;

/// Leading + trailing throttle. The first change in a quiet period fires at
/// once; changes inside the interval collapse into one trailing fire at the
/// interval's end.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_fire: Option<Instant>,
    pending: bool,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fire: None,
            pending: false,
        }
    }

    /// Record a change. Returns `true` when it should be published now.
    pub fn on_change(&mut self, now: Instant) -> bool {
        match self.last_fire {
            Some(last) if now.duration_since(last) < self.interval => {
                self.pending = true;
                false
            }
            _ => {
                self.last_fire = Some(now);
                self.pending = false;
                true
            }
        }
    }

    /// When the trailing fire is due, if one is owed.
    pub fn deadline(&self) -> Option<Instant> {
        match (self.pending, self.last_fire) {
            (true, Some(last)) => Some(last + self.interval),
            _ => None,
        }
    }

    /// Returns `true` when the owed trailing fire should be published now.
    pub fn on_tick(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(due) if now >= due => {
                self.pending = false;
                self.last_fire = Some(now);
                true
            }
            _ => false,
        }
    }
}
