//! E2E Test Suite 01: encode/decode round-trips.
//!
//! Covers the wire format invariants: round-trip fidelity while the
//! producing dictionary stays live, the raw sentinel, strict size
//! monotonicity, and dictionary-id routing after training.

use std::time::{Duration, Instant};

use dictcache::{
    looks_compressed, Config, DecodedSize, EncodeOutcome, Engine, HEADER_SIZE, NO_DICT_ID,
};
use tempfile::TempDir;

fn base_cfg(dict_dir: &TempDir) -> Config {
    let mut cfg = Config::default();
    cfg.dict_dir = Some(dict_dir.path().to_path_buf());
    cfg.min_comp_size = 32;
    cfg.dict_size = 16 * 1024;
    cfg.retraining_interval_s = 0;
    cfg.sample_p = 1.0;
    cfg
}

/// Feeds sample traffic and blocks until the trainer publishes at least
/// `min_runs` dictionaries (or panics after a generous deadline).
fn train_until(engine: &Engine, seed_base: u64, min_runs: u64) {
    for i in 0..512u64 {
        let key = format!("u:{i}");
        let value = dictcache::lorem::json_payload(seed_base + i, 256);
        engine.sample(key.as_bytes(), &value);
    }
    engine.train_now();
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let runs = engine.snapshot_stats(None).unwrap().trainer_runs;
        if runs >= min_runs {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "trainer did not publish within deadline (runs={runs})"
        );
        std::thread::sleep(Duration::from_millis(50));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: dictionaryless round-trip before any training
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn roundtrip_without_dictionary() {
    let dir = TempDir::new().unwrap();
    let mut cfg = base_cfg(&dir);
    cfg.enable_training = false;
    let engine = Engine::new(cfg).unwrap();

    let value = dictcache::lorem::json_payload(1, 4096);
    let EncodeOutcome::Compressed { bytes, dict_id } = engine.maybe_encode(b"u:1", &value)
    else {
        panic!("json payload must compress");
    };
    assert_eq!(dict_id, NO_DICT_ID);
    assert!(bytes.len() < value.len(), "size monotonicity");
    assert!(looks_compressed(&bytes));
    assert_eq!(engine.maybe_decode(&bytes, b"u:1").unwrap(), value);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: trained dictionary round-trip with id routing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn roundtrip_with_trained_dictionary() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(base_cfg(&dir)).unwrap();
    train_until(&engine, 1000, 1);

    let value = dictcache::lorem::json_payload(77, 4096);
    let EncodeOutcome::Compressed { bytes, dict_id } = engine.maybe_encode(b"u:key", &value)
    else {
        panic!("must compress");
    };
    assert_ne!(dict_id, NO_DICT_ID, "trained dictionary must be routed");
    assert!(engine.dict_exists(dict_id));

    // Header carries the id big-endian.
    assert_eq!(bytes[0], (dict_id >> 8) as u8);
    assert_eq!(bytes[1], (dict_id & 0xFF) as u8);
    assert!(bytes.len() < value.len() + HEADER_SIZE);

    assert_eq!(engine.maybe_decode(&bytes, b"u:key").unwrap(), value);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: raw sentinel decodes to remaining bytes verbatim
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn raw_sentinel_frame_decodes_verbatim() {
    let dir = TempDir::new().unwrap();
    let mut cfg = base_cfg(&dir);
    cfg.enable_training = false;
    let engine = Engine::new(cfg).unwrap();

    for payload in [&b""[..], b"x", b"some raw payload with bytes \x00\xFF"] {
        let mut frame = vec![0xFF, 0xFF];
        frame.extend_from_slice(payload);
        assert_eq!(engine.maybe_decode(&frame, b"any").unwrap(), payload);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: byte-level counters after a compressed write
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn byte_counters_track_compression() {
    let dir = TempDir::new().unwrap();
    let mut cfg = base_cfg(&dir);
    cfg.enable_training = false;
    cfg.enable_sampling = false;
    let engine = Engine::new(cfg).unwrap();

    let value = dictcache::lorem::json_payload(5, 4096);
    let EncodeOutcome::Compressed { bytes, .. } = engine.maybe_encode(b"k", &value) else {
        panic!("must compress");
    };
    let stats = engine.snapshot_stats(None).unwrap();
    assert_eq!(stats.bytes_raw_total, value.len() as u64);
    assert_eq!(stats.bytes_cmp_total, bytes.len() as u64);
    assert_eq!(stats.writes, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: decoded_size answers without decompressing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn decoded_size_matches_decode() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(base_cfg(&dir)).unwrap();
    train_until(&engine, 2000, 1);

    let value = dictcache::lorem::json_payload(9, 8192);
    let EncodeOutcome::Compressed { bytes, .. } = engine.maybe_encode(b"u:size", &value)
    else {
        panic!("must compress");
    };
    assert_eq!(
        engine.decoded_size(&bytes).unwrap(),
        DecodedSize::Known(value.len() as u64)
    );
    assert_eq!(
        engine.maybe_decode(&bytes, b"u:size").unwrap().len(),
        value.len()
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: decode keeps working for frames produced before a later training
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn old_frames_survive_new_publications() {
    let dir = TempDir::new().unwrap();
    let mut cfg = base_cfg(&dir);
    cfg.dict_retain_max = 8;
    let engine = Engine::new(cfg).unwrap();

    train_until(&engine, 3000, 1);
    let value = dictcache::lorem::json_payload(42, 4096);
    let EncodeOutcome::Compressed { bytes, dict_id } = engine.maybe_encode(b"u:old", &value)
    else {
        panic!("must compress");
    };

    // Publish a second dictionary; the first stays in the table under the
    // retention cap and old frames remain decodable.
    train_until(&engine, 4000, 2);
    assert!(engine.dict_exists(dict_id), "retained dictionary must stay live");
    assert_eq!(engine.maybe_decode(&bytes, b"u:old").unwrap(), value);
}
