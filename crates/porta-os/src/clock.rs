use std::time::{Instant, SystemTime, UNIX_EPOCH};

use porta::Now;

/// A clock reading the monotonic uptime and the system wall clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    boot: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    /// Creates a [`SystemClock`] whose uptime starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }

    /// Returns the current [`Now`].
    ///
    /// The wall-clock part is missing when the system time is set before
    /// the Unix epoch.
    #[must_use]
    pub fn now(&self) -> Now {
        let uptime_ms = u64::try_from(self.boot.elapsed().as_millis()).unwrap_or(u64::MAX);
        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|elapsed| u64::try_from(elapsed.as_millis()).ok());
        Now::new(uptime_ms, unix_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::SystemClock;

    #[test]
    fn uptime_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = clock.now();

        assert!(second.uptime_ms >= first.uptime_ms + 5);
        assert!(first.unix_ms.is_some());
    }
}
