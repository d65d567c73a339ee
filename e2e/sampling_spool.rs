//! E2E Test Suite 07: reservoir sampling and the on-disk spool.

use std::time::Duration;

use dictcache::sample::spool::{spool_path, SpoolReader};
use dictcache::{Config, Engine};
use tempfile::TempDir;

fn cfg(spool: &TempDir) -> Config {
    let mut cfg = Config::default();
    cfg.enable_training = false;
    cfg.min_comp_size = 32;
    cfg.sample_p = 1.0;
    cfg.spool_dir = Some(spool.path().to_path_buf());
    cfg.spool_max_bytes = 64 * 1024;
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: explicit sampling writes through to the spool
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn samples_reach_the_spool() {
    let spool = TempDir::new().unwrap();
    let engine = Engine::new(cfg(&spool)).unwrap();

    for i in 0..16u32 {
        engine.sample(
            format!("k{i}").as_bytes(),
            format!("value number {i}").as_bytes(),
        );
    }

    let records: Vec<_> = SpoolReader::open(&spool_path(spool.path(), ""))
        .unwrap()
        .collect::<std::io::Result<_>>()
        .unwrap();
    assert_eq!(records.len(), 16);
    assert_eq!(records[3].0, b"k3");
    assert_eq!(records[3].1, b"value number 3");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: encode-path sampling is gated by sample_p
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn zero_probability_spools_nothing() {
    let spool = TempDir::new().unwrap();
    let mut c = cfg(&spool);
    c.sample_p = 0.0;
    let engine = Engine::new(c).unwrap();

    for i in 0..32u32 {
        let value = dictcache::lorem::json_payload(i as u64, 512);
        engine.maybe_encode(format!("k{i}").as_bytes(), &value);
    }

    let path = spool_path(spool.path(), "");
    let spooled = match SpoolReader::open(&path) {
        Ok(reader) => reader.count(),
        // The spool file may not even exist when nothing was admitted.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => panic!("unexpected spool error: {e}"),
    };
    assert_eq!(spooled, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: namespaces get separate spool files
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn per_namespace_spool_files() {
    let spool = TempDir::new().unwrap();
    let engine = Engine::new(cfg(&spool)).unwrap();
    engine.set_namespaces(&["u:", "p:"]);

    for i in 0..4u32 {
        engine.sample(format!("u:{i}").as_bytes(), b"user value");
        engine.sample(format!("p:{i}").as_bytes(), b"post value");
    }
    engine.sample(b"other", b"default value");

    let u = SpoolReader::open(&spool_path(spool.path(), "u:")).unwrap().count();
    let p = SpoolReader::open(&spool_path(spool.path(), "p:")).unwrap().count();
    let d = SpoolReader::open(&spool_path(spool.path(), "")).unwrap().count();
    assert_eq!((u, p, d), (4, 4, 1));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: disabled sampling never touches the reservoir
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn disabled_sampling_is_inert() {
    let spool = TempDir::new().unwrap();
    let mut c = cfg(&spool);
    c.enable_sampling = false;
    let engine = Engine::new(c).unwrap();

    engine.sample(b"k", b"value");
    let value = dictcache::lorem::json_payload(1, 1024);
    engine.maybe_encode(b"k2", &value);

    assert!(SpoolReader::open(&spool_path(spool.path(), "")).is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: the spool is append-only across engine restarts
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn spool_appends_across_restarts() {
    let spool = TempDir::new().unwrap();
    {
        let engine = Engine::new(cfg(&spool)).unwrap();
        engine.sample(b"k1", b"one");
    }
    {
        let engine = Engine::new(cfg(&spool)).unwrap();
        engine.sample(b"k2", b"two");
        // Give the engine a moment, then drop.
        std::thread::sleep(Duration::from_millis(10));
    }
    let records: Vec<_> = SpoolReader::open(&spool_path(spool.path(), ""))
        .unwrap()
        .collect::<std::io::Result<_>>()
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].0, b"k1");
    assert_eq!(records[1].0, b"k2");
}
