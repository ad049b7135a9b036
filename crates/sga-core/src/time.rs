//! Engine clock, advanced by the host once per tick

use serde::{Deserialize, Serialize};

/// Current time as seen by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    /// Seconds since the host started ticking
    pub now: f64,
    /// Host frame counter
    pub frame: u64,
}

impl Clock {
    pub const ZERO: Self = Self { now: 0.0, frame: 0 };

    #[inline]
    pub fn new(now: f64, frame: u64) -> Self {
        Self { now, frame }
    }

    /// Seconds elapsed since `since`, never negative
    #[inline]
    pub fn seconds_since(&self, since: f64) -> f64 {
        (self.now - since).max(0.0)
    }

    /// Frames elapsed since `since`
    #[inline]
    pub fn frames_since(&self, since: u64) -> u64 {
        self.frame.saturating_sub(since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed() {
        let clock = Clock::new(2.5, 150);
        assert_eq!(clock.seconds_since(1.0), 1.5);
        assert_eq!(clock.seconds_since(3.0), 0.0);
        assert_eq!(clock.frames_since(100), 50);
        assert_eq!(clock.frames_since(200), 0);
    }
}
