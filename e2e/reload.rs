//! E2E Test Suite 06: dictionary persistence and reload.
//!
//! Dictionaries published by one engine must be picked up by the next via
//! the on-disk manifests, keeping previously encoded frames decodable
//! across a process restart.

use std::time::{Duration, Instant};

use dictcache::{Config, EncodeOutcome, Engine};
use tempfile::TempDir;

fn cfg(dir: &TempDir) -> Config {
    let mut cfg = Config::default();
    cfg.dict_dir = Some(dir.path().to_path_buf());
    cfg.min_comp_size = 32;
    cfg.dict_size = 16 * 1024;
    cfg.retraining_interval_s = 0;
    cfg.sample_p = 1.0;
    cfg
}

fn train_once(engine: &Engine, seed: u64, target_runs: u64) {
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
// Test 1: frames survive an engine restart
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn frames_decode_after_restart() {
    let dir = TempDir::new().unwrap();
    let value = dictcache::lorem::json_payload(77, 4096);

    let (frame, dict_id) = {
        let engine = Engine::new(cfg(&dir)).unwrap();
        train_once(&engine, 0, 1);
        match engine.maybe_encode(b"u:persist", &value) {
            EncodeOutcome::Compressed { bytes, dict_id } => (bytes, dict_id),
            EncodeOutcome::PassThrough => panic!("must compress"),
        }
        // Engine drops here; files stay (default quarantine is long).
    };
    assert_ne!(dict_id, 0);

    let mut cfg2 = cfg(&dir);
    cfg2.enable_training = false;
    let engine2 = Engine::new(cfg2).unwrap();
    assert!(
        engine2.dict_exists(dict_id),
        "startup reload must restore the dictionary"
    );
    assert_eq!(engine2.maybe_decode(&frame, b"u:persist").unwrap(), value);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: explicit reload returns the dictionary count
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn explicit_reload_counts_dictionaries() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(cfg(&dir)).unwrap();
    assert_eq!(engine.reload_dictionaries().unwrap(), 0);

    train_once(&engine, 0, 1);
    let n = engine.reload_dictionaries().unwrap();
    assert!(n >= 1, "published dictionary must be found on disk, got {n}");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: reload without a dict_dir is an error, not a crash
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn reload_without_dict_dir_errors() {
    let mut cfg = Config::default();
    cfg.enable_training = false;
    cfg.enable_sampling = false;
    let engine = Engine::new(cfg).unwrap();
    assert!(engine.reload_dictionaries().is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: foreign litter in the dict dir is skipped
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn reload_skips_foreign_files() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(cfg(&dir)).unwrap();
    train_once(&engine, 0, 1);

    std::fs::write(dir.path().join("notes.txt"), b"not a dictionary").unwrap();
    std::fs::write(dir.path().join("broken.mf"), b"{ not json").unwrap();

    let n = engine.reload_dictionaries().unwrap();
    assert!(n >= 1, "valid dictionaries still load");

    // The engine keeps encoding with the reloaded table.
    let value = dictcache::lorem::json_payload(5, 2048);
    let out = engine.maybe_encode(b"u:after", &value);
    assert!(matches!(out, EncodeOutcome::Compressed { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: training continues after a reload (fresh ids, no collisions)
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn training_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::new(cfg(&dir)).unwrap();
        train_once(&engine, 0, 1);
    }

    let engine2 = Engine::new(cfg(&dir)).unwrap();
    train_once(&engine2, 50_000, 1);

    // Two live dictionaries with distinct ids.
    let mut live = 0;
    let mut seen = std::collections::BTreeSet::new();
    for id in 1..=16u16 {
        if engine2.dict_exists(id) {
            live += 1;
            assert!(seen.insert(id));
        }
    }
    assert!(live >= 2, "restart must not reuse a live id, live={live}");
}
