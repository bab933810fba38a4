use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::ConditionalSync;

/// A source of wall-clock time, expressed as milliseconds since the Unix
/// epoch. All expiry arithmetic in the wallet-ucan packages goes through a
/// [Clock] so that token lifetimes can be exercised deterministically.
pub trait Clock: ConditionalSync {
    /// The current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;
}

/// The [Clock] backed by the host's system time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }
}

/// Convert a [Duration] into whole milliseconds, saturating at [u64::MAX]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(any(test, feature = "helpers"))]
mod manual {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };
    use std::time::Duration;

    use super::{duration_ms, Clock};

    /// A [Clock] that only moves when told to. Clones share the same time.
    #[derive(Clone, Debug, Default)]
    pub struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        /// A clock frozen at `now_ms`
        pub fn new(now_ms: u64) -> Self {
            ManualClock {
                now: Arc::new(AtomicU64::new(now_ms)),
            }
        }

        /// Jump to an absolute time
        pub fn set(&self, now_ms: u64) {
            self.now.store(now_ms, Ordering::SeqCst);
        }

        /// Move the clock forward by `duration`
        pub fn advance(&self, duration: Duration) {
            self.now.fetch_add(duration_ms(duration), Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }
}

#[cfg(any(test, feature = "helpers"))]
pub use manual::ManualClock;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Clock, ManualClock, SystemClock};

    #[test]
    fn it_reads_a_plausible_system_time() {
        // 2020-09-13T12:26:40Z
        assert!(SystemClock.now_ms() > 1_600_000_000_000);
    }

    #[test]
    fn it_shares_manual_time_between_clones() {
        let clock = ManualClock::new(1_000_000);
        let other = clock.clone();

        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now_ms(), 1_000_250);

        other.set(42);
        assert_eq!(clock.now_ms(), 42);
    }
}
