//! Per-namespace statistics, rebuilt atomically alongside the namespace
//! set and readable without blocking writers.
//!
//! Hot-path updates are relaxed fetch-adds on the counter block resolved by
//! prefix lookup; the global aggregate is synthesized on read by summing
//! the blocks, never maintained per operation.

pub mod drift;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::sample::Reservoir;

use drift::DriftState;

// ---------------------------------------------------------------------------
// Counter block
// ---------------------------------------------------------------------------

/// Atomic counters for one namespace. Monotonically non-decreasing within a
/// process lifetime; increments use relaxed ordering.
#[derive(Default)]
pub struct StatsBlock {
    pub bytes_raw_total: AtomicU64,
    pub bytes_cmp_total: AtomicU64,
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub errs_compress: AtomicU64,
    pub errs_decompress: AtomicU64,
    pub errs_dict_miss: AtomicU64,
    pub errs_trainer: AtomicU64,
    pub errs_io: AtomicU64,
    pub skipped_comp_min_size: AtomicU64,
    pub skipped_comp_max_size: AtomicU64,
    pub skipped_comp_incomp: AtomicU64,
    pub skipped_comp_nogain: AtomicU64,
    pub trainer_runs: AtomicU64,
    pub drift_signals: AtomicU64,
}

impl StatsBlock {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn merge_into(&self, snap: &mut StatsSnapshot) {
        snap.bytes_raw_total += self.bytes_raw_total.load(Ordering::Relaxed);
        snap.bytes_cmp_total += self.bytes_cmp_total.load(Ordering::Relaxed);
        snap.reads += self.reads.load(Ordering::Relaxed);
        snap.writes += self.writes.load(Ordering::Relaxed);
        snap.errs_compress += self.errs_compress.load(Ordering::Relaxed);
        snap.errs_decompress += self.errs_decompress.load(Ordering::Relaxed);
        snap.errs_dict_miss += self.errs_dict_miss.load(Ordering::Relaxed);
        snap.errs_trainer += self.errs_trainer.load(Ordering::Relaxed);
        snap.errs_io += self.errs_io.load(Ordering::Relaxed);
        snap.skipped_comp_min_size += self.skipped_comp_min_size.load(Ordering::Relaxed);
        snap.skipped_comp_max_size += self.skipped_comp_max_size.load(Ordering::Relaxed);
        snap.skipped_comp_incomp += self.skipped_comp_incomp.load(Ordering::Relaxed);
        snap.skipped_comp_nogain += self.skipped_comp_nogain.load(Ordering::Relaxed);
        snap.trainer_runs += self.trainer_runs.load(Ordering::Relaxed);
        snap.drift_signals += self.drift_signals.load(Ordering::Relaxed);
    }
}

/// Point-in-time copy of one namespace's counters (or of the global
/// aggregate, namespace `"*"`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub namespace: String,
    pub bytes_raw_total: u64,
    pub bytes_cmp_total: u64,
    pub reads: u64,
    pub writes: u64,
    pub errs_compress: u64,
    pub errs_decompress: u64,
    pub errs_dict_miss: u64,
    pub errs_trainer: u64,
    pub errs_io: u64,
    pub skipped_comp_min_size: u64,
    pub skipped_comp_max_size: u64,
    pub skipped_comp_incomp: u64,
    pub skipped_comp_nogain: u64,
    pub trainer_runs: u64,
    pub drift_signals: u64,
}

// ---------------------------------------------------------------------------
// Namespace state
// ---------------------------------------------------------------------------

/// Everything the engine tracks per namespace: the counter block, the
/// sample reservoir, and the drift detector. One allocation, shared by
/// registry generations so a rebuild preserves counters.
pub struct NsState {
    pub prefix: String,
    pub stats: StatsBlock,
    pub reservoir: Reservoir,
    pub drift: DriftState,
}

impl NsState {
    fn new(prefix: &str, cfg: &Config) -> Self {
        NsState {
            prefix: prefix.to_string(),
            stats: StatsBlock::default(),
            reservoir: Reservoir::new(prefix, cfg),
            drift: DriftState::new(),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut snap = StatsSnapshot {
            namespace: self.prefix.clone(),
            ..StatsSnapshot::default()
        };
        self.stats.merge_into(&mut snap);
        snap
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable snapshot of the namespace set. Rebuilt as a whole when the set
/// changes; retained namespaces keep their `NsState` allocation (and with
/// it their counters), new ones start zeroed.
pub struct Registry {
    entries: Vec<Arc<NsState>>,
    default_ns: Arc<NsState>,
    only_default: bool,
}

impl Registry {
    /// The boot registry: only the default namespace.
    pub fn bootstrap(cfg: &Config) -> Self {
        Registry {
            entries: Vec::new(),
            default_ns: Arc::new(NsState::new("", cfg)),
            only_default: true,
        }
    }

    /// Builds the successor registry for a new namespace set. Prefix order
    /// is preserved; empty and duplicate prefixes are ignored.
    pub fn rebuild(&self, prefixes: &[String], cfg: &Config) -> Registry {
        let mut entries: Vec<Arc<NsState>> = Vec::with_capacity(prefixes.len());
        for prefix in prefixes {
            if prefix.is_empty() || entries.iter().any(|e| &e.prefix == prefix) {
                continue;
            }
            match self.entries.iter().find(|e| &e.prefix == prefix) {
                Some(existing) => entries.push(Arc::clone(existing)),
                None => entries.push(Arc::new(NsState::new(prefix, cfg))),
            }
        }
        let only_default = entries.is_empty();
        Registry {
            entries,
            default_ns: Arc::clone(&self.default_ns),
            only_default,
        }
    }

    /// Resolves a key to its namespace state: longest matching prefix, or
    /// the default block when nothing matches.
    pub fn lookup(&self, key: &[u8]) -> &Arc<NsState> {
        if self.only_default {
            return &self.default_ns;
        }
        let mut best: Option<&Arc<NsState>> = None;
        for entry in &self.entries {
            if key.starts_with(entry.prefix.as_bytes()) {
                match best {
                    Some(b) if entry.prefix.len() <= b.prefix.len() => {}
                    _ => best = Some(entry),
                }
            }
        }
        best.unwrap_or(&self.default_ns)
    }

    /// Exact-prefix fetch; the empty string names the default namespace.
    pub fn get(&self, prefix: &str) -> Option<&Arc<NsState>> {
        if prefix.is_empty() {
            return Some(&self.default_ns);
        }
        self.entries.iter().find(|e| e.prefix == prefix)
    }

    /// User namespaces in registration order.
    pub fn prefixes(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.prefix.clone()).collect()
    }

    /// Default block plus every user namespace.
    pub fn all(&self) -> impl Iterator<Item = &Arc<NsState>> {
        std::iter::once(&self.default_ns).chain(self.entries.iter())
    }

    pub fn default_ns(&self) -> &Arc<NsState> {
        &self.default_ns
    }

    pub fn only_default(&self) -> bool {
        self.only_default
    }

    /// Sums every block into the global aggregate, namespace `"*"`.
    pub fn aggregate(&self) -> StatsSnapshot {
        let mut snap = StatsSnapshot {
            namespace: "*".to_string(),
            ..StatsSnapshot::default()
        };
        for ns in self.all() {
            ns.stats.merge_into(&mut snap);
        }
        snap
    }
}

/// Publication slot for the registry, same discipline as the table slot.
pub struct RegistrySlot {
    slot: RwLock<Arc<Registry>>,
}

impl RegistrySlot {
    pub fn new(registry: Registry) -> Self {
        RegistrySlot {
            slot: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn load(&self) -> Arc<Registry> {
        self.slot.read().expect("registry slot poisoned").clone()
    }

    pub fn swap(&self, next: Arc<Registry>) -> Arc<Registry> {
        let mut guard = self.slot.write().expect("registry slot poisoned");
        std::mem::replace(&mut *guard, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn cfg() -> Config {
        Config::default()
    }

    #[test]
    fn bootstrap_routes_everything_to_default() {
        let reg = Registry::bootstrap(&cfg());
        assert!(reg.only_default());
        let ns = reg.lookup(b"anything");
        assert!(ns.prefix.is_empty());
    }

    #[test]
    fn longest_prefix_lookup() {
        let reg = Registry::bootstrap(&cfg());
        let reg = reg.rebuild(
            &["u:".to_string(), "u:img:".to_string(), "p:".to_string()],
            &cfg(),
        );
        assert_eq!(reg.lookup(b"u:img:9").prefix, "u:img:");
        assert_eq!(reg.lookup(b"u:txt:9").prefix, "u:");
        assert_eq!(reg.lookup(b"p:9").prefix, "p:");
        assert!(reg.lookup(b"q:9").prefix.is_empty());
    }

    #[test]
    fn rebuild_preserves_retained_counters() {
        let reg = Registry::bootstrap(&cfg());
        let reg = reg.rebuild(&["u:".to_string()], &cfg());
        for _ in 0..100 {
            StatsBlock::bump(&reg.lookup(b"u:k").stats.writes);
        }
        let reg = reg.rebuild(&["u:".to_string(), "p:".to_string()], &cfg());
        assert_eq!(
            reg.get("u:").unwrap().stats.writes.load(Ordering::Relaxed),
            100
        );
        assert_eq!(
            reg.get("p:").unwrap().stats.writes.load(Ordering::Relaxed),
            0
        );
    }

    #[test]
    fn aggregate_sums_all_blocks() {
        let reg = Registry::bootstrap(&cfg());
        let reg = reg.rebuild(&["u:".to_string(), "p:".to_string()], &cfg());
        StatsBlock::add(&reg.lookup(b"u:k").stats.bytes_raw_total, 100);
        StatsBlock::add(&reg.lookup(b"p:k").stats.bytes_raw_total, 50);
        StatsBlock::add(&reg.lookup(b"zz").stats.bytes_raw_total, 7);
        let agg = reg.aggregate();
        assert_eq!(agg.namespace, "*");
        assert_eq!(agg.bytes_raw_total, 157);
    }

    #[test]
    fn duplicate_and_empty_prefixes_ignored() {
        let reg = Registry::bootstrap(&cfg());
        let reg = reg.rebuild(
            &["u:".to_string(), "".to_string(), "u:".to_string()],
            &cfg(),
        );
        assert_eq!(reg.prefixes(), vec!["u:".to_string()]);
    }
}
