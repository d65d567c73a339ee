// gc.rs - quarantined reclamation of retired routing tables.
//
// Single consumer thread. Publishers (trainer, reload, namespace changes)
// push displaced tables onto an MPSC channel; each GC tick drains it and
// processes nodes in FIFO arrival order. Memory is reclaimed once the
// table-level cool period has elapsed and its readers have drained; files
// are unlinked only after the per-dictionary quarantine period, and never
// while the current table still references the same id and blob path.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::engine::Shared;
use crate::stats::StatsBlock;
use crate::timefn::wall_clock_secs;

use super::table::Table;

/// Idle backoff bounds between drains.
pub const BACKOFF_MIN: Duration = Duration::from_millis(200);
pub const BACKOFF_MAX: Duration = Duration::from_secs(2);

/// A displaced routing table queued for reclamation.
pub(crate) struct RetiredTable {
    pub table: Arc<Table>,
    pub at: Instant,
}

pub(crate) enum GcEvent {
    Retired(RetiredTable),
    /// Nudges the GC out of its backoff sleep (shutdown).
    Wake,
}

// A dictionary whose memory is gone but whose files await quarantine
// expiry. Holds paths only, never codec handles.
struct QuarantineEntry {
    id: u16,
    dict_path: PathBuf,
    manifest_path: PathBuf,
    retired_at: u64,
}

pub(crate) fn spawn(shared: Arc<Shared>, rx: Receiver<GcEvent>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("dictcache-gc".to_string())
        .spawn(move || {
            Gc {
                shared,
                rx,
                pending: Vec::new(),
                quarantine: Vec::new(),
                backoff: BACKOFF_MIN,
            }
            .run()
        })
        .expect("failed to spawn gc thread")
}

struct Gc {
    shared: Arc<Shared>,
    rx: Receiver<GcEvent>,
    pending: Vec<RetiredTable>,
    quarantine: Vec<QuarantineEntry>,
    backoff: Duration,
}

impl Gc {
    fn run(mut self) {
        info!("gc started");
        loop {
            match self.rx.recv_timeout(self.backoff) {
                Ok(ev) => {
                    self.ingest(ev);
                    while let Ok(ev) = self.rx.try_recv() {
                        self.ingest(ev);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.shared.stop_requested() {
                break;
            }
            let progressed = self.process();
            self.backoff = if progressed {
                BACKOFF_MIN
            } else {
                (self.backoff * 2).min(BACKOFF_MAX)
            };
        }

        // Final drain: reclaim whatever is already eligible, then exit.
        // Quarantined files that have not aged out stay on disk for the
        // next process to reload or collect.
        while let Ok(ev) = self.rx.try_recv() {
            self.ingest(ev);
        }
        self.process();
        info!(
            pending = self.pending.len(),
            quarantined = self.quarantine.len(),
            "gc stopped"
        );
    }

    fn ingest(&mut self, ev: GcEvent) {
        match ev {
            GcEvent::Retired(node) => self.pending.push(node),
            GcEvent::Wake => {}
        }
    }

    /// One reclamation pass. Returns true when anything was freed or
    /// unlinked, which resets the idle backoff.
    fn process(&mut self) -> bool {
        let cfg = &self.shared.cfg;
        let current = self.shared.table.load();
        let now_secs = wall_clock_secs();
        let mut progressed = false;

        // Memory pass, FIFO over arrival order.
        let mut deferred = Vec::new();
        for node in self.pending.drain(..) {
            if node.at.elapsed() < cfg.gc_cool_period {
                deferred.push(node);
                continue;
            }
            // Readers holding the table keep its strong count above ours.
            if Arc::strong_count(&node.table) > 1 {
                deferred.push(node);
                continue;
            }
            for meta in node.table.all_metas() {
                if current.contains_same(meta.id(), meta.dict_path()) {
                    continue;
                }
                meta.retire(now_secs);
                let tracked = self
                    .quarantine
                    .iter()
                    .any(|q| q.id == meta.id() && q.dict_path == meta.dict_path());
                if !tracked {
                    self.quarantine.push(QuarantineEntry {
                        id: meta.id(),
                        dict_path: meta.dict_path().to_path_buf(),
                        manifest_path: meta.manifest_path().to_path_buf(),
                        retired_at: meta.retired_at(),
                    });
                }
            }
            debug!(version = node.table.version(), "retired table reclaimed");
            progressed = true;
            // Dropping the node frees the table and every dictionary
            // handle no newer table shares.
        }
        self.pending = deferred;

        // File pass.
        let quarantine_secs = cfg.gc_quarantine_period.as_secs();
        let entries = std::mem::take(&mut self.quarantine);
        for entry in entries {
            if current.contains_same(entry.id, &entry.dict_path) {
                // Republished (reload); the files are live again.
                progressed = true;
                continue;
            }
            if entry.retired_at == 0
                || now_secs.saturating_sub(entry.retired_at) < quarantine_secs
            {
                self.quarantine.push(entry);
                continue;
            }
            self.unlink(&entry);
            progressed = true;
        }

        progressed
    }

    fn unlink(&self, entry: &QuarantineEntry) {
        for path in [&entry.dict_path, &entry.manifest_path] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "quarantine unlink failed");
                    let registry = self.shared.registry.load();
                    StatsBlock::bump(&registry.default_ns().stats.errs_io);
                }
            }
        }
        debug!(id = entry.id, path = %entry.dict_path.display(), "quarantined dictionary deleted");
    }
}
