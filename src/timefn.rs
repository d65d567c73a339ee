// timefn - clock sources shared by the engine, trainer, and GC.
//
// Rust's std::time::Instant is monotonic and MT-safe on all supported
// platforms; SystemTime provides the wall clock used for retirement stamps
// and manifest timestamps. Background threads must never compare Instants
// against wall-clock seconds, so the two are kept behind distinct helpers.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Nanosecond duration type used by timing logs and the benchmarks.
pub type DurationNs = u64;

/// Returns the current monotonic timestamp.
pub fn monotonic() -> Instant {
    Instant::now()
}

/// Nanoseconds elapsed since `start`.
pub fn clock_span_ns(start: Instant) -> DurationNs {
    start.elapsed().as_nanos() as DurationNs
}

/// Wall-clock seconds since the unix epoch.
///
/// A clock stepped before the epoch reads as 0 rather than panicking; the
/// GC treats 0 as "retirement stamp missing" and re-stamps.
pub fn wall_clock_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Elapsed-time probe for trainer and reload timing logs.
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Stopwatch { start: Instant::now() }
    }

    /// Milliseconds elapsed since `start()`.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_is_monotonic() {
        let t0 = monotonic();
        let a = clock_span_ns(t0);
        let b = clock_span_ns(t0);
        assert!(b >= a);
    }

    #[test]
    fn wall_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(wall_clock_secs() > 1_577_836_800);
    }

    #[test]
    fn stopwatch_counts_up() {
        let sw = Stopwatch::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(sw.elapsed_ms() >= 4);
    }
}
