//! Sliding-window send gate.
//!
//! Each adapter owns one gate; a job that cannot get a slot is deferred by
//! the queue engine (nudged forward, still Pending) rather than failed.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Per-channel sends-per-minute cap. `max_per_minute == 0` means unlimited.
pub struct SendGate {
    max_per_minute: u32,
    sends: Mutex<VecDeque<Instant>>,
}

impl SendGate {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            sends: Mutex::new(VecDeque::new()),
        }
    }

    /// Try to reserve a send slot. Counts the reservation immediately so
    /// concurrent workers cannot all squeeze through the same remaining slot.
    pub fn try_acquire(&self) -> bool {
        if self.max_per_minute == 0 {
            return true;
        }
        let now = Instant::now();
        let mut sends = self.sends.lock().unwrap_or_else(|p| p.into_inner());
        while let Some(front) = sends.front() {
            if now.duration_since(*front) >= WINDOW {
                sends.pop_front();
            } else {
                break;
            }
        }
        if (sends.len() as u32) < self.max_per_minute {
            sends.push_back(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_enforced() {
        let gate = SendGate::new(3);
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
    }

    #[test]
    fn test_zero_means_unlimited() {
        let gate = SendGate::new(0);
        for _ in 0..1000 {
            assert!(gate.try_acquire());
        }
    }
}
