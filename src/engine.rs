//! The compression engine: encode/decode pipeline, namespace management,
//! reload, statistics queries, and lifecycle of the background threads.
//!
//! `Engine` is the single public entry point. Internally everything hangs
//! off one shared context so the trainer, GC, and async workers see the
//! same routing table, registry, and stop flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::codec::header::{
    self, DecodedSize, HEADER_SIZE, NO_DICT_ID, RAW_SENTINEL,
};
use crate::codec::{self, probe};
use crate::config::{Config, GB};
use crate::dict::gc::{self, GcEvent, RetiredTable};
use crate::dict::manifest;
use crate::dict::table::{Table, TableSlot};
use crate::dict::trainer::{self, TrainerSignal};
use crate::error::{AsyncError, CodecError, ConfigError};
use crate::stats::{Registry, RegistrySlot, StatsBlock, StatsSnapshot};
use crate::threadpool::{AsyncReply, WorkPool};
use crate::timefn::{wall_clock_secs, Stopwatch};

// Absolute ceiling on a single decode allocation, regardless of what a
// frame header claims its content size is.
const DECODE_CAP_MAX: usize = GB;

/// Tells the engine whether the current operation originated from a
/// replicated or replay stream; encode is disabled in that case so replicas
/// store byte-identical values.
pub trait ReplicaOracle: Send + Sync {
    fn is_replicated_origin(&self) -> bool;
}

/// Default oracle for hosts without replication.
pub struct NeverReplicated;

impl ReplicaOracle for NeverReplicated {
    fn is_replicated_origin(&self) -> bool {
        false
    }
}

/// Result of `maybe_encode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// Store the raw value; the engine added no header.
    PassThrough,
    /// Store `bytes` (2-byte header plus compressed payload).
    Compressed { bytes: Vec<u8>, dict_id: u16 },
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

pub(crate) struct Shared {
    pub(crate) cfg: Config,
    pub(crate) table: TableSlot,
    pub(crate) registry: RegistrySlot,
    pub(crate) signal: TrainerSignal,
    pub(crate) publish_lock: Mutex<()>,
    stop: AtomicBool,
    gc_tx: Sender<GcEvent>,
    oracle: Box<dyn ReplicaOracle>,
}

impl Shared {
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub(crate) fn send_retired(&self, table: Arc<Table>) {
        let _ = self.gc_tx.send(GcEvent::Retired(RetiredTable {
            table,
            at: Instant::now(),
        }));
    }

    // -- encode -------------------------------------------------------------

    pub(crate) fn encode(&self, key: &[u8], value: &[u8]) -> EncodeOutcome {
        if !self.cfg.enable_comp || self.oracle.is_replicated_origin() {
            return EncodeOutcome::PassThrough;
        }
        let registry = self.registry.load();
        let ns = registry.lookup(key);
        StatsBlock::bump(&ns.stats.writes);

        if self.cfg.enable_sampling {
            ns.reservoir.offer(key, value, self.cfg.sample_p);
        }

        if value.len() < self.cfg.min_comp_size {
            StatsBlock::bump(&ns.stats.skipped_comp_min_size);
            return EncodeOutcome::PassThrough;
        }
        if value.len() > self.cfg.max_comp_size {
            StatsBlock::bump(&ns.stats.skipped_comp_max_size);
            return EncodeOutcome::PassThrough;
        }
        if !probe::is_compressible(value) {
            StatsBlock::bump(&ns.stats.skipped_comp_incomp);
            return EncodeOutcome::PassThrough;
        }

        let table = self.table.load();
        let meta = if self.cfg.enable_dict {
            table.lookup_by_prefix(key)
        } else {
            None
        };
        let dict_id = meta.map_or(NO_DICT_ID, |m| m.id());

        let result = codec::compress_scratch(
            value,
            meta.map(|m| m.encoder()),
            self.cfg.zstd_level,
            |payload| {
                // Header plus payload must be strictly smaller than the
                // raw value; an exact tie stores raw.
                if payload.len() + HEADER_SIZE < value.len() {
                    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
                    header::write_header(&mut out, dict_id);
                    out.extend_from_slice(payload);
                    Some(out)
                } else {
                    None
                }
            },
        );

        match result {
            Ok(Some(bytes)) => {
                StatsBlock::add(&ns.stats.bytes_raw_total, value.len() as u64);
                StatsBlock::add(&ns.stats.bytes_cmp_total, bytes.len() as u64);
                let ratio = bytes.len() as f64 / value.len() as f64;
                if ns
                    .drift
                    .observe(ratio, self.cfg.ewma_alpha, self.cfg.retrain_drop)
                {
                    StatsBlock::bump(&ns.stats.drift_signals);
                    self.signal.raise_drift();
                }
                EncodeOutcome::Compressed { bytes, dict_id }
            }
            Ok(None) => {
                StatsBlock::bump(&ns.stats.skipped_comp_nogain);
                EncodeOutcome::PassThrough
            }
            Err(e) => {
                debug!(error = %e, "compression failed; storing raw");
                StatsBlock::bump(&ns.stats.errs_compress);
                EncodeOutcome::PassThrough
            }
        }
    }

    // -- decode -------------------------------------------------------------

    pub(crate) fn decode(&self, encoded: &[u8], key: &[u8]) -> Result<Vec<u8>, CodecError> {
        let registry = self.registry.load();
        let ns = registry.lookup(key);
        StatsBlock::bump(&ns.stats.reads);

        let (id, payload) = match header::parse_header(encoded) {
            Ok(parsed) => parsed,
            Err(e) => {
                StatsBlock::bump(&ns.stats.errs_decompress);
                return Err(e);
            }
        };
        if id == RAW_SENTINEL {
            return Ok(payload.to_vec());
        }

        let capacity = match zstd::zstd_safe::get_frame_content_size(payload) {
            Ok(Some(n)) => (n as usize).min(DECODE_CAP_MAX),
            _ => self.cfg.max_comp_size,
        };

        if id == NO_DICT_ID {
            return codec::decompress(payload, None, capacity).map_err(|e| {
                StatsBlock::bump(&ns.stats.errs_decompress);
                CodecError::Decompress(e)
            });
        }

        let table = self.table.load();
        let meta = match table.lookup_by_id(id) {
            Some(m) => m,
            None => {
                StatsBlock::bump(&ns.stats.errs_dict_miss);
                return Err(CodecError::DictMiss(id));
            }
        };
        codec::decompress(payload, Some(meta.decoder()), capacity).map_err(|e| {
            StatsBlock::bump(&ns.stats.errs_decompress);
            CodecError::Decompress(e)
        })
    }

    // -- reload / namespaces ------------------------------------------------

    fn reload_dictionaries(&self) -> std::io::Result<usize> {
        let dict_dir = self.cfg.dict_dir.as_ref().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no dict_dir configured")
        })?;
        let sw = Stopwatch::start();
        let metas = match manifest::load_dir(dict_dir, self.cfg.zstd_level) {
            Ok(m) => m,
            Err(e) => {
                let registry = self.registry.load();
                StatsBlock::bump(&registry.default_ns().stats.errs_io);
                return Err(e);
            }
        };
        let count = metas.len();

        let _publish = self.publish_lock.lock().expect("publish lock poisoned");
        let registry = self.registry.load();
        let current = self.table.load();
        let next = Table::from_metas(&registry.prefixes(), metas, current.version() + 1);

        let now_secs = wall_clock_secs();
        for old in current.all_metas() {
            if !next.contains_same(old.id(), old.dict_path()) {
                old.retire(now_secs);
            }
        }
        let displaced = self.table.swap(Arc::new(next));
        self.send_retired(displaced);
        info!(count, elapsed_ms = sw.elapsed_ms(), "dictionaries reloaded");
        Ok(count)
    }

    fn set_namespaces(&self, prefixes: &[String]) {
        let _publish = self.publish_lock.lock().expect("publish lock poisoned");

        let registry = self.registry.load();
        let next_registry = registry.rebuild(prefixes, &self.cfg);
        self.registry.swap(Arc::new(next_registry));

        let current = self.table.load();
        let (next, retired) = current.rebuild_with_namespaces(prefixes);
        let now_secs = wall_clock_secs();
        for meta in &retired {
            meta.retire(now_secs);
        }
        let displaced = self.table.swap(Arc::new(next));
        self.send_retired(displaced);
        info!(namespaces = prefixes.len(), retired = retired.len(), "namespace set rebuilt");
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Dictionary-assisted value compression for an in-memory key-value cache.
///
/// Owns the background trainer and GC threads plus the optional async
/// worker pool; dropping the engine (or calling [`Engine::shutdown`]) stops
/// and joins all of them.
pub struct Engine {
    shared: Arc<Shared>,
    trainer: Option<JoinHandle<()>>,
    gc: Option<JoinHandle<()>>,
    pool: Option<WorkPool>,
}

impl Engine {
    /// Builds an engine with no replication (the common standalone case).
    pub fn new(cfg: Config) -> Result<Self, ConfigError> {
        Self::with_oracle(cfg, Box::new(NeverReplicated))
    }

    /// Builds an engine with a host-provided replication oracle.
    pub fn with_oracle(
        cfg: Config,
        oracle: Box<dyn ReplicaOracle>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let (gc_tx, gc_rx) = crossbeam_channel::unbounded();
        let registry = Registry::bootstrap(&cfg);
        let shared = Arc::new(Shared {
            table: TableSlot::new(Table::empty()),
            registry: RegistrySlot::new(registry),
            signal: TrainerSignal::new(),
            publish_lock: Mutex::new(()),
            stop: AtomicBool::new(false),
            gc_tx,
            oracle,
            cfg,
        });

        // Pick up dictionaries persisted by an earlier process before any
        // traffic arrives. A missing or unreadable directory is not fatal.
        if shared.cfg.dict_dir.is_some() {
            if let Err(e) = shared.reload_dictionaries() {
                warn!(error = %e, "startup dictionary reload failed");
            }
        }

        // The pool is fallible; build it before any background thread is
        // spawned so a failure cannot leave unjoined threads behind.
        let pool = if shared.cfg.async_cmd_enabled {
            Some(
                WorkPool::new(
                    shared.cfg.async_thread_pool_size,
                    shared.cfg.async_queue_size,
                    shared.cfg.async_fail_fast,
                )
                .ok_or(ConfigError::OutOfRange {
                    key: "async_thread_pool_size",
                    reason: "worker pool could not be created",
                })?,
            )
        } else {
            None
        };
        let gc = Some(gc::spawn(Arc::clone(&shared), gc_rx));
        let trainer = if shared.cfg.enable_training {
            Some(trainer::spawn(Arc::clone(&shared)))
        } else {
            None
        };

        info!(
            dicts = shared.table.load().dict_count(),
            training = shared.cfg.enable_training,
            advised_level = %shared.cfg.tracing_level(),
            "engine started"
        );
        Ok(Engine {
            shared,
            trainer,
            gc,
            pool,
        })
    }

    /// Encodes one write. Pass-through means the caller stores the raw
    /// value unchanged; the engine never adds a header in that case.
    pub fn maybe_encode(&self, key: &[u8], value: &[u8]) -> EncodeOutcome {
        self.shared.encode(key, value)
    }

    /// Decodes one read. `encoded` must carry the 2-byte header; use
    /// [`looks_compressed`](crate::codec::header::looks_compressed) first
    /// when raw values share the keyspace.
    pub fn maybe_decode(&self, encoded: &[u8], key: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.shared.decode(encoded, key)
    }

    /// Decoded length of an encoded value without decompressing it.
    pub fn decoded_size(&self, encoded: &[u8]) -> Result<DecodedSize, CodecError> {
        header::decoded_size(encoded)
    }

    /// Feeds one (key, value) pair to the sample reservoir outside the
    /// encode path.
    pub fn sample(&self, key: &[u8], value: &[u8]) {
        if !self.shared.cfg.enable_sampling {
            return;
        }
        let registry = self.shared.registry.load();
        registry
            .lookup(key)
            .reservoir
            .offer(key, value, self.shared.cfg.sample_p);
    }

    /// Replaces the user namespace set, rebuilding the statistics registry
    /// and the routing table atomically. Counters of retained namespaces
    /// are preserved; new namespaces start at zero.
    pub fn set_namespaces<S: AsRef<str>>(&self, prefixes: &[S]) {
        let prefixes: Vec<String> =
            prefixes.iter().map(|p| p.as_ref().to_string()).collect();
        self.shared.set_namespaces(&prefixes);
    }

    /// Registered user namespace prefixes, in registration order.
    pub fn list_namespaces(&self) -> Vec<String> {
        self.shared.registry.load().prefixes()
    }

    /// Whether a dictionary with this id is present in the current table.
    pub fn dict_exists(&self, id: u16) -> bool {
        self.shared.table.load().lookup_by_id(id).is_some()
    }

    /// Snapshot of one namespace's counters (`Some(prefix)`, with `""`
    /// naming the default namespace) or the global aggregate (`None`).
    pub fn snapshot_stats(&self, namespace: Option<&str>) -> Option<StatsSnapshot> {
        let registry = self.shared.registry.load();
        match namespace {
            None => Some(registry.aggregate()),
            Some(prefix) => registry.get(prefix).map(|ns| ns.snapshot()),
        }
    }

    /// Re-reads every dictionary under `dict_dir` and publishes a fresh
    /// routing table. Returns the number of dictionaries loaded.
    pub fn reload_dictionaries(&self) -> std::io::Result<usize> {
        self.shared.reload_dictionaries()
    }

    /// Asks the trainer for an immediate cycle, bypassing the interval and
    /// minimum-bytes gates.
    pub fn train_now(&self) {
        self.shared.signal.raise_force();
    }

    // -- async wrappers -----------------------------------------------------

    /// Queues an encode on the worker pool. Fails when async commands are
    /// disabled or the bounded queue rejects the submission.
    pub fn encode_async(
        &self,
        key: &[u8],
        value: &[u8],
        timeout: Option<Duration>,
    ) -> Result<AsyncReply<EncodeOutcome>, AsyncError> {
        let pool = self.pool.as_ref().ok_or(AsyncError::Rejected)?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        let shared = Arc::clone(&self.shared);
        let key = key.to_vec();
        let value = value.to_vec();
        pool.submit(Box::new(move || {
            let _ = tx.send(shared.encode(&key, &value));
        }))?;
        Ok(AsyncReply::new(rx, timeout))
    }

    /// Queues a decode on the worker pool.
    pub fn decode_async(
        &self,
        encoded: &[u8],
        key: &[u8],
        timeout: Option<Duration>,
    ) -> Result<AsyncReply<Result<Vec<u8>, CodecError>>, AsyncError> {
        let pool = self.pool.as_ref().ok_or(AsyncError::Rejected)?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        let shared = Arc::clone(&self.shared);
        let encoded = encoded.to_vec();
        let key = key.to_vec();
        pool.submit(Box::new(move || {
            let _ = tx.send(shared.decode(&encoded, &key));
        }))?;
        Ok(AsyncReply::new(rx, timeout))
    }

    /// Stops and joins the trainer, GC, and worker pool. Idempotent; also
    /// runs on drop.
    pub fn shutdown(&mut self) {
        if self.gc.is_none() && self.trainer.is_none() && self.pool.is_none() {
            return;
        }
        self.shared.request_stop();
        self.shared.signal.wake();
        let _ = self.shared.gc_tx.send(GcEvent::Wake);

        if let Some(pool) = self.pool.take() {
            drop(pool);
        }
        if let Some(t) = self.trainer.take() {
            let _ = t.join();
        }
        if let Some(g) = self.gc.take() {
            let _ = g.join();
        }
        info!("engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool as TestFlag;

    fn quiet_cfg() -> Config {
        let mut cfg = Config::default();
        cfg.enable_training = false;
        cfg.enable_sampling = false;
        cfg
    }

    #[test]
    fn passthrough_below_min_size() {
        let engine = Engine::new(quiet_cfg()).unwrap();
        let out = engine.maybe_encode(b"a", b"hi");
        assert_eq!(out, EncodeOutcome::PassThrough);
        let stats = engine.snapshot_stats(Some("")).unwrap();
        assert_eq!(stats.skipped_comp_min_size, 1);
        assert_eq!(stats.writes, 1);
    }

    #[test]
    fn dictionaryless_roundtrip_through_engine() {
        let engine = Engine::new(quiet_cfg()).unwrap();
        let value = crate::lorem::json_payload(1, 4096);
        let out = engine.maybe_encode(b"k", &value);
        let EncodeOutcome::Compressed { bytes, dict_id } = out else {
            panic!("json text must compress");
        };
        assert_eq!(dict_id, NO_DICT_ID);
        assert!(bytes.len() < value.len());
        assert_eq!(engine.maybe_decode(&bytes, b"k").unwrap(), value);
    }

    #[test]
    fn raw_sentinel_decodes_verbatim() {
        let engine = Engine::new(quiet_cfg()).unwrap();
        let mut frame = vec![0xFF, 0xFF];
        frame.extend_from_slice(b"raw bytes here");
        assert_eq!(
            engine.maybe_decode(&frame, b"k").unwrap(),
            b"raw bytes here"
        );
    }

    #[test]
    fn dict_miss_is_reported() {
        let engine = Engine::new(quiet_cfg()).unwrap();
        let payload = zstd::bulk::compress(&crate::lorem::json_payload(2, 1024), 3).unwrap();
        let mut frame = vec![0x00, 0x2A];
        frame.extend_from_slice(&payload);
        assert!(matches!(
            engine.maybe_decode(&frame, b"k"),
            Err(CodecError::DictMiss(0x002A))
        ));
        let stats = engine.snapshot_stats(Some("")).unwrap();
        assert_eq!(stats.errs_dict_miss, 1);
    }

    #[test]
    fn replica_origin_disables_encode() {
        struct Replaying(TestFlag);
        impl ReplicaOracle for Replaying {
            fn is_replicated_origin(&self) -> bool {
                self.0.load(Ordering::Relaxed)
            }
        }
        let engine =
            Engine::with_oracle(quiet_cfg(), Box::new(Replaying(TestFlag::new(true)))).unwrap();
        let value = crate::lorem::json_payload(3, 4096);
        assert_eq!(engine.maybe_encode(b"k", &value), EncodeOutcome::PassThrough);
    }

    #[test]
    fn master_switch_disables_encode_not_decode() {
        let mut cfg = quiet_cfg();
        cfg.enable_comp = false;
        let engine = Engine::new(cfg).unwrap();
        let value = crate::lorem::json_payload(4, 4096);
        assert_eq!(engine.maybe_encode(b"k", &value), EncodeOutcome::PassThrough);

        // Values encoded before the switch stay readable.
        let payload = zstd::bulk::compress(&value, 3).unwrap();
        let mut frame = vec![0x00, 0x00];
        frame.extend_from_slice(&payload);
        assert_eq!(engine.maybe_decode(&frame, b"k").unwrap(), value);
    }

    #[test]
    fn decoded_size_queries() {
        let engine = Engine::new(quiet_cfg()).unwrap();
        let value = crate::lorem::json_payload(5, 2048);
        let EncodeOutcome::Compressed { bytes, .. } = engine.maybe_encode(b"k", &value) else {
            panic!("must compress");
        };
        assert_eq!(
            engine.decoded_size(&bytes).unwrap(),
            DecodedSize::Known(value.len() as u64)
        );
        let raw = [0xFFu8, 0xFF, 1, 2, 3];
        assert_eq!(engine.decoded_size(&raw).unwrap(), DecodedSize::Raw(3));
    }
}
