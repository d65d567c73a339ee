//! Bounded random sampling of raw (key, value) traffic per namespace.
//!
//! Admission is a Bernoulli gate followed by reservoir sampling
//! (Algorithm R) over the gated stream, so the admission cost is
//! independent of value size and the resident set stays under the byte
//! cap. A wall-clock window lets the trainer forget old distributions.

pub mod spool;

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

use crate::config::Config;
use spool::SpoolWriter;

/// One sampled write, timestamped for window truncation.
pub struct Sample {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub at: Instant,
}

impl Sample {
    fn bytes(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

// Write-through spool, opened lazily on the first admission so namespaces
// that never sample leave no file behind. A failed open or append turns
// the spool off for the rest of the process.
enum SpoolSlot {
    Off,
    Lazy { dir: PathBuf, prefix: String },
    On(SpoolWriter),
}

struct Inner {
    items: Vec<Sample>,
    resident_bytes: usize,
    // Gated-stream position for Algorithm R; resets on drain.
    admitted: u64,
    spool: SpoolSlot,
}

impl Inner {
    fn spool_write(&mut self, key: &[u8], value: &[u8]) {
        if matches!(self.spool, SpoolSlot::Lazy { .. }) {
            let slot = std::mem::replace(&mut self.spool, SpoolSlot::Off);
            if let SpoolSlot::Lazy { dir, prefix } = slot {
                match SpoolWriter::open(&dir, &prefix) {
                    Ok(w) => self.spool = SpoolSlot::On(w),
                    Err(e) => {
                        warn!(prefix = %prefix, error = %e, "sample spool disabled: open failed");
                    }
                }
            }
        }
        if let SpoolSlot::On(w) = &mut self.spool {
            if let Err(e) = w.append(key, value) {
                warn!(error = %e, "sample spool disabled: append failed");
                self.spool = SpoolSlot::Off;
            }
        }
    }
}

/// Per-namespace sample reservoir with a byte cap and optional write-through
/// spool.
pub struct Reservoir {
    cap_bytes: usize,
    inner: Mutex<Inner>,
}

impl Reservoir {
    pub fn new(prefix: &str, cfg: &Config) -> Self {
        let spool = match &cfg.spool_dir {
            Some(dir) => SpoolSlot::Lazy {
                dir: dir.clone(),
                prefix: prefix.to_string(),
            },
            None => SpoolSlot::Off,
        };
        Reservoir {
            cap_bytes: cfg.spool_max_bytes,
            inner: Mutex::new(Inner {
                items: Vec::new(),
                resident_bytes: 0,
                admitted: 0,
                spool,
            }),
        }
    }

    /// Offers one write to the reservoir. Returns true when the sample was
    /// stored (fresh slot or Algorithm-R replacement).
    pub fn offer(&self, key: &[u8], value: &[u8], sample_p: f64) -> bool {
        if sample_p <= 0.0 || !rand::thread_rng().gen_bool(sample_p.min(1.0)) {
            return false;
        }
        let rec_bytes = key.len() + value.len();
        if rec_bytes > self.cap_bytes {
            return false;
        }

        let mut inner = self.inner.lock().expect("reservoir poisoned");
        inner.admitted += 1;

        let stored = if inner.resident_bytes + rec_bytes <= self.cap_bytes {
            inner.items.push(Sample {
                key: key.to_vec(),
                value: value.to_vec(),
                at: Instant::now(),
            });
            inner.resident_bytes += rec_bytes;
            true
        } else {
            // Reservoir full: keep with probability len/admitted by
            // replacing a uniformly random victim.
            let slot = rand::thread_rng().gen_range(0..inner.admitted);
            if (slot as usize) < inner.items.len() {
                let victim = &mut inner.items[slot as usize];
                let old_bytes = victim.bytes();
                *victim = Sample {
                    key: key.to_vec(),
                    value: value.to_vec(),
                    at: Instant::now(),
                };
                inner.resident_bytes = inner.resident_bytes - old_bytes + rec_bytes;
                // The replacement may be bigger than the victim; shed
                // random items until the cap holds again.
                while inner.resident_bytes > self.cap_bytes && inner.items.len() > 1 {
                    let evict = rand::thread_rng().gen_range(0..inner.items.len());
                    let gone = inner.items.swap_remove(evict);
                    inner.resident_bytes -= gone.bytes();
                }
                true
            } else {
                false
            }
        };

        if stored {
            inner.spool_write(key, value);
        }
        stored
    }

    /// Resident sample bytes; the trainer's readiness check.
    pub fn resident_bytes(&self) -> usize {
        self.inner.lock().expect("reservoir poisoned").resident_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("reservoir poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes every sample younger than `window`, emptying the reservoir and
    /// restarting the Algorithm-R stream.
    pub fn drain(&self, window: Duration) -> Vec<Sample> {
        let mut inner = self.inner.lock().expect("reservoir poisoned");
        let items = std::mem::take(&mut inner.items);
        inner.resident_bytes = 0;
        inner.admitted = 0;
        drop(inner);

        let now = Instant::now();
        items
            .into_iter()
            .filter(|s| now.duration_since(s.at) <= window)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservoir(cap: usize) -> Reservoir {
        let mut cfg = Config::default();
        cfg.spool_max_bytes = cap;
        cfg.spool_dir = None;
        Reservoir::new("u:", &cfg)
    }

    #[test]
    fn zero_probability_admits_nothing() {
        let r = reservoir(1024);
        for i in 0..100 {
            assert!(!r.offer(format!("k{i}").as_bytes(), b"value", 0.0));
        }
        assert!(r.is_empty());
    }

    #[test]
    fn certain_probability_fills_up_to_cap() {
        let r = reservoir(1024);
        for i in 0..200 {
            r.offer(format!("key-{i:04}").as_bytes(), &[b'v'; 32], 1.0);
        }
        assert!(r.resident_bytes() <= 1024);
        assert!(r.len() > 0);
    }

    #[test]
    fn oversized_record_rejected() {
        let r = reservoir(64);
        assert!(!r.offer(b"k", &[0u8; 128], 1.0));
        assert!(r.is_empty());
    }

    #[test]
    fn replacement_keeps_byte_cap() {
        let r = reservoir(512);
        // Mixed sizes force replacements and occasional shedding.
        for i in 0..500 {
            let len = 8 + (i % 96);
            r.offer(format!("k{i}").as_bytes(), &vec![b'x'; len], 1.0);
            assert!(r.resident_bytes() <= 512, "cap violated at i={i}");
        }
    }

    #[test]
    fn drain_empties_and_restarts() {
        let r = reservoir(4096);
        for i in 0..32 {
            r.offer(format!("k{i}").as_bytes(), &[b'v'; 16], 1.0);
        }
        let drained = r.drain(Duration::from_secs(3600));
        assert!(!drained.is_empty());
        assert!(r.is_empty());
        assert_eq!(r.resident_bytes(), 0);

        // The reservoir accepts new samples after a drain.
        assert!(r.offer(b"k", &[b'v'; 16], 1.0));
    }

    #[test]
    fn drain_truncates_old_samples() {
        let r = reservoir(4096);
        r.offer(b"old", &[b'v'; 16], 1.0);
        std::thread::sleep(Duration::from_millis(5));
        // A zero-length window drops everything already admitted.
        let drained = r.drain(Duration::from_secs(0));
        assert!(drained.is_empty());
    }

    #[test]
    fn spool_receives_admitted_samples() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.spool_max_bytes = 4096;
        cfg.spool_dir = Some(dir.path().to_path_buf());
        let r = Reservoir::new("u:", &cfg);

        for i in 0..8 {
            assert!(r.offer(format!("u:{i}").as_bytes(), b"payload", 1.0));
        }
        let path = spool::spool_path(dir.path(), "u:");
        let n = spool::SpoolReader::open(&path).unwrap().count();
        assert_eq!(n, 8);
    }
}
