// trainer.rs - the background dictionary trainer.
//
// One thread per engine. Each tick it evaluates every namespace: when a
// reservoir has accumulated enough sample bytes (or a drift signal /
// explicit request lowers the bar), it trains a fresh dictionary, persists
// blob and manifest atomically, and publishes a successor routing table.
// The displaced table goes to the GC. A failed cycle leaves the previous
// table authoritative.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::TrainMode;
use crate::engine::Shared;
use crate::error::TrainerError;
use crate::sample::spool::prefix_file_stem;
use crate::stats::{NsState, StatsBlock};
use crate::timefn::{wall_clock_secs, Stopwatch};

use super::manifest::{store_dictionary, Manifest};
use super::Meta;

// Poll period for readiness checks between explicit wake-ups.
const TICK: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Wake {
    force: bool,
    drift: bool,
}

/// Wake-up channel into the trainer: drift signals and explicit requests
/// cut the schedule short; shutdown wakes it to observe the stop flag.
pub(crate) struct TrainerSignal {
    state: Mutex<Wake>,
    cv: Condvar,
}

impl TrainerSignal {
    pub fn new() -> Self {
        TrainerSignal {
            state: Mutex::new(Wake::default()),
            cv: Condvar::new(),
        }
    }

    /// Drift detector trigger: retrain as soon as the schedule allows.
    pub fn raise_drift(&self) {
        self.state.lock().expect("trainer signal poisoned").drift = true;
        self.cv.notify_all();
    }

    /// Explicit request: retrain now, bypassing the interval gate.
    pub fn raise_force(&self) {
        self.state.lock().expect("trainer signal poisoned").force = true;
        self.cv.notify_all();
    }

    /// Bare notification (shutdown).
    pub fn wake(&self) {
        self.cv.notify_all();
    }

    fn take_timeout(&self, timeout: Duration) -> (bool, bool) {
        let mut st = self.state.lock().expect("trainer signal poisoned");
        if !st.force && !st.drift {
            let (guard, _) = self
                .cv
                .wait_timeout(st, timeout)
                .expect("trainer signal poisoned");
            st = guard;
        }
        let out = (st.force, st.drift);
        st.force = false;
        st.drift = false;
        out
    }
}

pub(crate) fn spawn(shared: Arc<Shared>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("dictcache-trainer".to_string())
        .spawn(move || run(shared))
        .expect("failed to spawn trainer thread")
}

fn run(shared: Arc<Shared>) {
    info!("trainer started");
    let mut last_success: Option<Instant> = None;
    loop {
        let (force, drift) = shared.signal.take_timeout(TICK);
        if shared.stop_requested() {
            break;
        }

        let interval_ok = last_success
            .map_or(true, |t| t.elapsed().as_secs() >= shared.cfg.retraining_interval_s);
        if !force && !interval_ok {
            continue;
        }

        let registry = shared.registry.load();
        let mut trained_any = false;
        for ns in registry.all() {
            if shared.stop_requested() {
                break;
            }
            match train_namespace(&shared, ns, force || drift) {
                Ok(true) => {
                    trained_any = true;
                    StatsBlock::bump(&ns.stats.trainer_runs);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(prefix = %ns.prefix, error = %e, "training cycle failed");
                    StatsBlock::bump(&ns.stats.errs_trainer);
                }
            }
        }
        if trained_any {
            last_success = Some(Instant::now());
        }
    }
    info!("trainer stopped");
}

/// Trains and publishes one namespace's dictionary. `relaxed` drops the
/// minimum-bytes gate (drift signal or explicit request); an empty
/// reservoir still skips quietly.
fn train_namespace(
    shared: &Arc<Shared>,
    ns: &Arc<NsState>,
    relaxed: bool,
) -> Result<bool, TrainerError> {
    let cfg = &shared.cfg;
    let resident = ns.reservoir.resident_bytes();
    if resident == 0 {
        return Ok(false);
    }
    if !relaxed && resident < cfg.min_training_size {
        return Ok(false);
    }
    let dict_dir = cfg.dict_dir.as_ref().ok_or(TrainerError::NoDictDir)?;

    let sw = Stopwatch::start();
    let samples = ns.reservoir.drain(cfg.training_window_duration);
    let have: usize = samples.iter().map(|s| s.value.len()).sum();
    if samples.is_empty() || (!relaxed && have < cfg.min_training_size) {
        // Window truncation can shrink the set between the readiness check
        // and the drain.
        return Err(TrainerError::NotEnoughSamples {
            have,
            need: cfg.min_training_size,
        });
    }

    let dict_bytes = match cfg.train_mode {
        TrainMode::Fast => {
            let mut data = Vec::with_capacity(have);
            let mut sizes = Vec::with_capacity(samples.len());
            for s in &samples {
                data.extend_from_slice(&s.value);
                sizes.push(s.value.len());
            }
            zstd::dict::from_continuous(&data, &sizes, cfg.dict_size)
                .map_err(TrainerError::Train)?
        }
        TrainMode::Optimize => {
            let values: Vec<&[u8]> = samples.iter().map(|s| s.value.as_slice()).collect();
            zstd::dict::from_samples(&values, cfg.dict_size).map_err(TrainerError::Train)?
        }
    };
    debug!(
        prefix = %ns.prefix,
        samples = samples.len(),
        sample_bytes = have,
        dict_bytes = dict_bytes.len(),
        "dictionary trained"
    );

    // Publication: id assignment, persistence, and the table swap happen
    // under the writer lock so concurrent reload or namespace changes
    // cannot interleave.
    let _publish = shared.publish_lock.lock().expect("publish lock poisoned");
    let current = shared.table.load();
    let id = current.next_free_id().ok_or(TrainerError::IdSpaceExhausted)?;
    let created_at = OffsetDateTime::now_utc();
    let manifest = Manifest::new(id, &dict_bytes, vec![ns.prefix.clone()], created_at);
    let stem = format!("{}-{id:04x}", prefix_file_stem(&ns.prefix));
    let (dict_path, manifest_path) =
        store_dictionary(dict_dir, &stem, &dict_bytes, &manifest).map_err(TrainerError::Io)?;

    let meta = Arc::new(Meta::new(
        id,
        &dict_bytes,
        vec![ns.prefix.clone()],
        cfg.zstd_level,
        dict_path,
        manifest_path,
        created_at,
    ));
    let (next, retired) = current.with_new_meta(&ns.prefix, meta, cfg.dict_retain_max);
    let version = next.version();
    let now_secs = wall_clock_secs();
    for old in &retired {
        old.retire(now_secs);
    }
    let displaced = shared.table.swap(Arc::new(next));
    shared.send_retired(displaced);
    ns.drift.rebaseline();

    info!(
        prefix = %ns.prefix,
        id,
        version,
        retired = retired.len(),
        elapsed_ms = sw.elapsed_ms(),
        "dictionary published"
    );
    Ok(true)
}
