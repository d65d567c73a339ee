// drift.rs - EWMA drift detection over the per-namespace compression ratio.
//
// Every accepted compression feeds its compressed/raw ratio into an EWMA.
// The baseline is the EWMA at the most recent successful training
// publication; when the current EWMA stays outside the tolerated band for
// a sustained run of samples, the detector raises a retrain signal.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Consecutive out-of-band samples required before a trigger fires. Keeps a
/// single pathological value from forcing a retrain.
pub const DRIFT_SUSTAIN: u32 = 16;

/// Drift state for one namespace. All fields are updated with relaxed
/// atomics from the encode hot path; the ratio EWMA is stored as f64 bits.
pub struct DriftState {
    ewma_bits: AtomicU64,
    baseline_bits: AtomicU64,
    high_run: AtomicU32,
    low_run: AtomicU32,
}

// Bit pattern of 0.0_f64, used as "no observation yet".
const UNSET: u64 = 0;

impl DriftState {
    pub fn new() -> Self {
        DriftState {
            ewma_bits: AtomicU64::new(UNSET),
            baseline_bits: AtomicU64::new(UNSET),
            high_run: AtomicU32::new(0),
            low_run: AtomicU32::new(0),
        }
    }

    /// Current EWMA of the compression ratio, or 0.0 before the first
    /// observation.
    pub fn ewma(&self) -> f64 {
        f64::from_bits(self.ewma_bits.load(Ordering::Relaxed))
    }

    /// Baseline ratio captured at the last training publication, or 0.0
    /// before the first one.
    pub fn baseline(&self) -> f64 {
        f64::from_bits(self.baseline_bits.load(Ordering::Relaxed))
    }

    /// Folds one compression ratio into the EWMA and returns true when a
    /// sustained rise or drop against the baseline crosses the trigger
    /// threshold. The caller counts the signal and wakes the trainer.
    ///
    /// Lossy under contention: two racing updates may fold in either order.
    /// The EWMA is a smoothing estimate, so the race is tolerable and keeps
    /// the path lock-free.
    pub fn observe(&self, ratio: f64, alpha: f64, retrain_drop: f64) -> bool {
        let prev = self.ewma();
        let next = if prev == 0.0 {
            ratio
        } else {
            alpha * ratio + (1.0 - alpha) * prev
        };
        self.ewma_bits.store(next.to_bits(), Ordering::Relaxed);

        let baseline = self.baseline();
        if baseline == 0.0 {
            // No training has published yet; nothing to drift from.
            return false;
        }

        if next > baseline * (1.0 + retrain_drop) {
            self.low_run.store(0, Ordering::Relaxed);
            let run = self.high_run.fetch_add(1, Ordering::Relaxed) + 1;
            if run >= DRIFT_SUSTAIN {
                self.high_run.store(0, Ordering::Relaxed);
                return true;
            }
        } else if next < baseline * (1.0 - retrain_drop) {
            self.high_run.store(0, Ordering::Relaxed);
            let run = self.low_run.fetch_add(1, Ordering::Relaxed) + 1;
            if run >= DRIFT_SUSTAIN {
                self.low_run.store(0, Ordering::Relaxed);
                return true;
            }
        } else {
            self.high_run.store(0, Ordering::Relaxed);
            self.low_run.store(0, Ordering::Relaxed);
        }
        false
    }

    /// Captures the current EWMA as the new baseline and clears the runs.
    /// Called after each successful training publication.
    pub fn rebaseline(&self) {
        let ewma = self.ewma_bits.load(Ordering::Relaxed);
        self.baseline_bits.store(ewma, Ordering::Relaxed);
        self.high_run.store(0, Ordering::Relaxed);
        self.low_run.store(0, Ordering::Relaxed);
    }
}

impl Default for DriftState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALPHA: f64 = 0.2;
    const DROP: f64 = 0.3;

    #[test]
    fn first_observation_seeds_the_ewma() {
        let d = DriftState::new();
        d.observe(0.5, ALPHA, DROP);
        assert!((d.ewma() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn no_trigger_without_baseline() {
        let d = DriftState::new();
        for _ in 0..(DRIFT_SUSTAIN * 4) {
            assert!(!d.observe(0.9, ALPHA, DROP));
        }
    }

    #[test]
    fn sustained_rise_triggers_once_per_run() {
        let d = DriftState::new();
        d.observe(0.3, ALPHA, DROP);
        d.rebaseline();

        // Push the EWMA well above baseline * 1.3, then count triggers.
        let mut triggers = 0;
        for _ in 0..(DRIFT_SUSTAIN * 3) {
            if d.observe(0.9, ALPHA, DROP) {
                triggers += 1;
            }
        }
        assert!(triggers >= 1, "sustained rise must trigger");
        assert!(triggers <= 3, "runs reset after each trigger");
    }

    #[test]
    fn in_band_samples_reset_the_run() {
        let d = DriftState::new();
        d.observe(0.5, ALPHA, DROP);
        d.rebaseline();

        for _ in 0..(DRIFT_SUSTAIN - 1) {
            assert!(!d.observe(0.9, ALPHA, DROP));
        }
        // A large in-band batch drags the EWMA back and clears the run.
        for _ in 0..64 {
            d.observe(0.5, ALPHA, DROP);
        }
        for _ in 0..(DRIFT_SUSTAIN - 1) {
            assert!(!d.observe(0.9, ALPHA, DROP));
        }
    }

    #[test]
    fn rebaseline_adopts_current_ewma() {
        let d = DriftState::new();
        for _ in 0..32 {
            d.observe(0.7, ALPHA, DROP);
        }
        d.rebaseline();
        assert!((d.baseline() - d.ewma()).abs() < 1e-12);
    }
}
