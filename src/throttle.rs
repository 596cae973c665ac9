// src/throttle.rs
//
// Per-document commit backpressure: no loop may attempt a commit to the same
// path more often than `Config::min_commit_interval`, regardless of how
// tight its own cycle is.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct CommitThrottle {
    last_attempt: HashMap<&'static str, Instant>,
}

impl CommitThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a commit attempt against `path` is allowed right now. Records
    /// the attempt as the new watermark, so a second call within
    /// `min_interval` is denied regardless of whether the first attempt
    /// actually produced a commit.
    pub fn allow(&mut self, path: &'static str, min_interval: Duration) -> bool {
        let now = Instant::now();
        match self.last_attempt.get(path) {
            Some(last) if now.duration_since(*last) < min_interval => false,
            _ => {
                self.last_attempt.insert(path, now);
                true
            }
        }
    }
}
