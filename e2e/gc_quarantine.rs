//! E2E Test Suite 04: GC cool-off and file quarantine.
//!
//! Retired dictionaries must keep their files through the quarantine period
//! and lose them afterwards; dictionaries still referenced by the current
//! table are never touched.

use std::path::Path;
use std::time::{Duration, Instant};

use dictcache::{Config, Engine};
use tempfile::TempDir;

fn cfg(dir: &TempDir, quarantine_secs: u64) -> Config {
    let mut cfg = Config::default();
    cfg.dict_dir = Some(dir.path().to_path_buf());
    cfg.min_comp_size = 32;
    cfg.dict_size = 16 * 1024;
    cfg.retraining_interval_s = 0;
    cfg.sample_p = 1.0;
    cfg.dict_retain_max = 1;
    cfg.gc_cool_period = Duration::from_secs(0);
    cfg.gc_quarantine_period = Duration::from_secs(quarantine_secs);
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

fn dict_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".dict"))
        .collect();
    names.sort();
    names
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: files survive the quarantine window, then disappear
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn quarantined_files_deleted_after_period() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(cfg(&dir, 3)).unwrap();

    // First dictionary, then a second publication that evicts it
    // (dict_retain_max = 1).
    train_once(&engine, 0, 1);
    assert_eq!(dict_files(dir.path()).len(), 1);
    train_once(&engine, 10_000, 2);

    // Inside the quarantine window both blobs must still exist.
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(
        dict_files(dir.path()).len(),
        2,
        "files must survive quarantine"
    );

    // After the window the GC unlinks the evicted blob and manifest on its
    // next tick (idle backoff caps at 2 s).
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let files = dict_files(dir.path());
        if files.len() == 1 {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "quarantined files not deleted: {files:?}"
        );
        std::thread::sleep(Duration::from_millis(100));
    }

    // The survivor is the live dictionary.
    let manifests = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".mf"))
        .count();
    assert_eq!(manifests, 1, "manifest deleted together with the blob");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: live dictionaries are never reclaimed
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn live_dictionary_files_are_kept() {
    let dir = TempDir::new().unwrap();
    let mut c = cfg(&dir, 0);
    c.dict_retain_max = 8;
    let engine = Engine::new(c).unwrap();

    train_once(&engine, 0, 1);
    train_once(&engine, 10_000, 2);

    // Zero quarantine, zero cool-off, retention keeps both: nothing to
    // delete even after several GC ticks.
    std::thread::sleep(Duration::from_secs(3));
    assert_eq!(dict_files(dir.path()).len(), 2);
    assert!(engine.dict_exists(1) || engine.dict_exists(2));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: shutdown performs a final drain without deleting early
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn shutdown_final_drain_respects_quarantine() {
    let dir = TempDir::new().unwrap();
    let mut engine = Engine::new(cfg(&dir, 3600)).unwrap();

    train_once(&engine, 0, 1);
    train_once(&engine, 10_000, 2);
    engine.shutdown();

    // The evicted dictionary was inside its quarantine window at shutdown;
    // its files must still be on disk for the next process.
    assert_eq!(dict_files(dir.path()).len(), 2);
}
