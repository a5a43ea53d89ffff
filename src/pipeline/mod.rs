//! Relay pipelines
//!
//! Each pipeline is opened (socket + device acquired, failures reported to
//! the caller) and then run on its worker until the stop signal clears.
//! Dropping a pipeline releases its device stream and socket.

pub mod capture;
pub mod playback;

pub use capture::CapturePipeline;
pub use playback::PlaybackPipeline;

use std::fmt;

/// Which way audio flows in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Capture locally and transmit
    Send,
    /// Receive and play locally
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "send"),
            Direction::Receive => write!(f, "receive"),
        }
    }
}

/// Log at most the first and then every `every`th occurrence
pub(crate) fn should_log(count: u64, every: u64) -> bool {
    count == 1 || count % every == 0
}

/// Counts consecutive failures of an operation that normally succeeds
#[derive(Debug)]
pub(crate) struct ErrorStreak {
    current: u32,
    limit: u32,
}

impl ErrorStreak {
    pub(crate) fn new(limit: u32) -> Self {
        Self { current: 0, limit }
    }

    /// Record a failure; true once the streak reaches the limit
    pub(crate) fn fail(&mut self) -> bool {
        self.current = self.current.saturating_add(1);
        self.current >= self.limit
    }

    pub(crate) fn reset(&mut self) {
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_log_first_and_every_nth() {
        let logged: Vec<u64> = (1..=250).filter(|&n| should_log(n, 100)).collect();
        assert_eq!(logged, vec![1, 100, 200]);
    }

    #[test]
    fn test_error_streak_trips_at_limit() {
        let mut streak = ErrorStreak::new(3);
        assert!(!streak.fail());
        assert!(!streak.fail());
        assert!(streak.fail());
    }

    #[test]
    fn test_error_streak_reset_by_success() {
        let mut streak = ErrorStreak::new(3);
        streak.fail();
        streak.fail();
        streak.reset();
        assert!(!streak.fail());
        assert!(!streak.fail());
    }
}
