//! Status ordering and liveness tracking.
//!
//! Validates that per-device status counters only move forward and watches
//! the "last status seen" clock that turns peer silence into a session
//! error. The default regime is one clock for the whole session; the
//! per-device regime tracks each connected device separately and is enabled
//! by configuration.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::counter_is_newer;
use crate::devices::DeviceKey;

/// What the liveness check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusStall {
    /// No device has sent a status within the timeout.
    Session,
    /// This device has sent nothing within the timeout (per-device regime).
    Device(DeviceKey),
}

/// Per-session status validation and liveness state.
#[derive(Debug)]
pub struct StatusPipeline {
    timeout: Duration,
    per_device: bool,
    last_status_at: Instant,
    counters: HashMap<DeviceKey, u32>,
    last_seen: HashMap<DeviceKey, Instant>,
}

impl StatusPipeline {
    /// Creates the pipeline. The liveness clock starts on [`arm`](Self::arm).
    #[must_use]
    pub fn new(timeout: Duration, per_device: bool) -> Self {
        Self {
            timeout,
            per_device,
            last_status_at: Instant::now(),
            counters: HashMap::new(),
            last_seen: HashMap::new(),
        }
    }

    /// Starts (or restarts) the liveness clocks. Called at Running entry.
    pub fn arm(&mut self, now: Instant) {
        self.last_status_at = now;
        for seen in self.last_seen.values_mut() {
            *seen = now;
        }
    }

    /// Checks and records the per-device counter. The first status of a
    /// device seeds its counter; afterwards only strictly newer values
    /// (wrap-aware) are accepted. Returns `false` for stale duplicates.
    pub fn accept_counter(&mut self, key: &DeviceKey, counter: u32) -> bool {
        match self.counters.get(key) {
            Some(&last) if !counter_is_newer(counter, last) => false,
            _ => {
                self.counters.insert(key.clone(), counter);
                true
            }
        }
    }

    /// Records status arrival for the liveness clocks.
    pub fn note_status(&mut self, key: &DeviceKey, now: Instant) {
        self.last_status_at = now;
        self.last_seen.insert(key.clone(), now);
    }

    /// Drops all per-device state of a disconnected device. A later
    /// reconnect reseeds its counter.
    pub fn forget_device(&mut self, key: &DeviceKey) {
        self.counters.remove(key);
        self.last_seen.remove(key);
    }

    /// The configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Liveness check, driven by ticks. Silence of exactly the timeout is
    /// still fine; only strictly longer silence stalls.
    #[must_use]
    pub fn check_stall(&self, now: Instant) -> Option<StatusStall> {
        if self.per_device {
            self.last_seen
                .iter()
                .find(|(_, &seen)| now > seen + self.timeout)
                .map(|(key, _)| StatusStall::Device(key.clone()))
        } else {
            (now > self.last_status_at + self.timeout).then_some(StatusStall::Session)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> DeviceKey {
        DeviceKey {
            module_id: 2,
            device_type: 7,
            role: "button".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn first_counter_seeds_then_must_increase() {
        let mut pipeline = StatusPipeline::new(Duration::from_secs(5), false);
        let device = key("A");
        assert!(pipeline.accept_counter(&device, 10));
        assert!(!pipeline.accept_counter(&device, 10));
        assert!(!pipeline.accept_counter(&device, 9));
        assert!(pipeline.accept_counter(&device, 11));
        assert!(pipeline.accept_counter(&device, 100));
    }

    #[test]
    fn counters_are_tracked_per_device() {
        let mut pipeline = StatusPipeline::new(Duration::from_secs(5), false);
        assert!(pipeline.accept_counter(&key("A"), 5));
        assert!(pipeline.accept_counter(&key("B"), 5));
        assert!(!pipeline.accept_counter(&key("A"), 5));
    }

    #[test]
    fn counter_wrap_is_accepted() {
        let mut pipeline = StatusPipeline::new(Duration::from_secs(5), false);
        let device = key("A");
        assert!(pipeline.accept_counter(&device, u32::MAX));
        assert!(pipeline.accept_counter(&device, 0));
    }

    #[test]
    fn forgetting_a_device_reseeds_its_counter() {
        let mut pipeline = StatusPipeline::new(Duration::from_secs(5), false);
        let device = key("A");
        assert!(pipeline.accept_counter(&device, 40));
        pipeline.forget_device(&device);
        assert!(pipeline.accept_counter(&device, 1));
    }

    #[test]
    fn session_stall_uses_strict_inequality() {
        let timeout = Duration::from_secs(5);
        let mut pipeline = StatusPipeline::new(timeout, false);
        let start = Instant::now();
        pipeline.arm(start);
        assert_eq!(pipeline.check_stall(start + timeout), None);
        assert_eq!(
            pipeline.check_stall(start + timeout + Duration::from_millis(1)),
            Some(StatusStall::Session)
        );
    }

    #[test]
    fn per_device_stall_names_the_silent_device() {
        let timeout = Duration::from_secs(5);
        let mut pipeline = StatusPipeline::new(timeout, true);
        let start = Instant::now();
        pipeline.note_status(&key("A"), start);
        pipeline.note_status(&key("B"), start + Duration::from_secs(3));

        let later = start + timeout + Duration::from_millis(1);
        assert_eq!(pipeline.check_stall(later), Some(StatusStall::Device(key("A"))));

        // The silent device drops out on disconnect; the other is fresh.
        pipeline.forget_device(&key("A"));
        assert_eq!(pipeline.check_stall(later), None);
    }

    #[test]
    fn fresh_status_resets_the_session_clock() {
        let timeout = Duration::from_secs(5);
        let mut pipeline = StatusPipeline::new(timeout, false);
        let start = Instant::now();
        pipeline.arm(start);
        pipeline.note_status(&key("A"), start + Duration::from_secs(4));
        assert_eq!(pipeline.check_stall(start + Duration::from_secs(8)), None);
    }
}
