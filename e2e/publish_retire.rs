//! E2E Test Suite 03: publish/retire races.
//!
//! Readers keep decoding while the trainer publishes a stream of new
//! routing tables and the GC reclaims the displaced ones with aggressive
//! periods. Every decode must either succeed against the table it observed
//! or report a clean dictionary miss; nothing may crash.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dictcache::{CodecError, Config, EncodeOutcome, Engine};
use tempfile::TempDir;

fn cfg(dir: &TempDir) -> Config {
    let mut cfg = Config::default();
    cfg.dict_dir = Some(dir.path().to_path_buf());
    cfg.min_comp_size = 32;
    cfg.dict_size = 16 * 1024;
    cfg.retraining_interval_s = 0;
    cfg.sample_p = 1.0;
    cfg.dict_retain_max = 16;
    // Aggressive reclamation keeps the GC busy during the race.
    cfg.gc_cool_period = Duration::from_secs(0);
    cfg.gc_quarantine_period = Duration::from_secs(0);
    cfg
}

fn feed_and_train(engine: &Engine, seed: u64, target_runs: u64) {
    for i in 0..256u64 {
        let value = dictcache::lorem::json_payload(seed + i, 256);
        engine.sample(format!("u:{i}").as_bytes(), &value);
    }
    engine.train_now();
    let deadline = Instant::now() + Duration::from_secs(20);
    while engine.snapshot_stats(None).unwrap().trainer_runs < target_runs {
        assert!(Instant::now() < deadline, "training stalled");
        std::thread::sleep(Duration::from_millis(20));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: concurrent decode during repeated publication
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn decodes_survive_repeated_publication() {
    const PUBLICATIONS: u64 = 5;

    let dir = TempDir::new().unwrap();
    let engine = Engine::new(cfg(&dir)).unwrap();
    feed_and_train(&engine, 0, 1);

    // A working set of frames encoded against whichever table was current.
    let values: Vec<Vec<u8>> = (0..16)
        .map(|i| dictcache::lorem::json_payload(9000 + i, 2048))
        .collect();
    let frames: Vec<Vec<u8>> = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            match engine.maybe_encode(format!("u:{i}").as_bytes(), v) {
                EncodeOutcome::Compressed { bytes, .. } => bytes,
                EncodeOutcome::PassThrough => panic!("json must compress"),
            }
        })
        .collect();

    let stop = AtomicBool::new(false);
    let decodes = AtomicU64::new(0);

    std::thread::scope(|scope| {
        for reader in 0..2 {
            let engine = &engine;
            let stop = &stop;
            let decodes = &decodes;
            let frames = &frames;
            let values = &values;
            scope.spawn(move || {
                let mut i = reader;
                while !stop.load(Ordering::Acquire) {
                    let idx = i % frames.len();
                    let key = format!("u:{idx}");
                    match engine.maybe_decode(&frames[idx], key.as_bytes()) {
                        // Retention keeps every produced id live, so a miss
                        // would be a routing bug here.
                        Ok(v) => assert_eq!(&v, &values[idx]),
                        Err(e) => panic!("decode failed mid-publication: {e}"),
                    }
                    decodes.fetch_add(1, Ordering::Relaxed);
                    i += 1;
                }
            });
        }

        // Publisher: N additional training cycles while the readers spin.
        for n in 0..PUBLICATIONS {
            feed_and_train(&engine, (n + 1) * 10_000, n + 2);
        }
        std::thread::sleep(Duration::from_millis(100));
        stop.store(true, Ordering::Release);
    });

    assert!(
        decodes.load(Ordering::Relaxed) > 100,
        "readers must have made progress"
    );
    assert_eq!(
        engine.snapshot_stats(None).unwrap().errs_decompress,
        0,
        "no decode may corrupt"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: a dictionary dropped past retention reports a clean miss
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn dropped_dictionary_reports_dict_miss() {
    let dir = TempDir::new().unwrap();
    let mut c = cfg(&dir);
    c.dict_retain_max = 1;
    let engine = Engine::new(c).unwrap();

    feed_and_train(&engine, 0, 1);
    let value = dictcache::lorem::json_payload(55, 2048);
    let EncodeOutcome::Compressed { bytes, dict_id } = engine.maybe_encode(b"u:x", &value)
    else {
        panic!("must compress");
    };

    // The next publication evicts the only retained dictionary.
    feed_and_train(&engine, 20_000, 2);
    assert!(!engine.dict_exists(dict_id), "retention cap must evict");
    match engine.maybe_decode(&bytes, b"u:x") {
        Err(CodecError::DictMiss(id)) => assert_eq!(id, dict_id),
        other => panic!("expected DictMiss, got {other:?}"),
    }
    assert_eq!(engine.snapshot_stats(None).unwrap().errs_dict_miss, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: shutdown during churn is clean
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn shutdown_mid_churn_joins_cleanly() {
    let dir = TempDir::new().unwrap();
    let mut engine = Engine::new(cfg(&dir)).unwrap();
    feed_and_train(&engine, 0, 1);
    for i in 0..64u64 {
        let value = dictcache::lorem::json_payload(i, 1024);
        engine.maybe_encode(format!("u:{i}").as_bytes(), &value);
    }
    engine.train_now();
    // Shut down while the trainer may still be mid-cycle.
    engine.shutdown();
}
