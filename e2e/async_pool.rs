//! E2E Test Suite 08: asynchronous command wrappers.
//!
//! Worker-pool submission, bounded-queue overflow in fail-fast mode, and
//! per-request timeouts.

use std::time::Duration;

use dictcache::{AsyncError, Config, EncodeOutcome, Engine};

fn cfg() -> Config {
    let mut cfg = Config::default();
    cfg.enable_training = false;
    cfg.enable_sampling = false;
    cfg.min_comp_size = 32;
    cfg.async_cmd_enabled = true;
    cfg.async_thread_pool_size = 2;
    cfg.async_queue_size = 8;
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: async encode/decode round-trip
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn async_roundtrip() {
    let engine = Engine::new(cfg()).unwrap();
    let value = dictcache::lorem::json_payload(1, 4096);

    let reply = engine.encode_async(b"k", &value, None).unwrap();
    let EncodeOutcome::Compressed { bytes, .. } = reply.wait().unwrap() else {
        panic!("must compress");
    };

    let reply = engine
        .decode_async(&bytes, b"k", Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(reply.wait().unwrap().unwrap(), value);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: many in-flight commands all complete
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn async_commands_complete_under_load() {
    let engine = Engine::new(cfg()).unwrap();
    let values: Vec<Vec<u8>> = (0..32)
        .map(|i| dictcache::lorem::json_payload(i, 2048))
        .collect();

    let replies: Vec<_> = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            engine
                .encode_async(format!("k{i}").as_bytes(), v, Some(Duration::from_secs(10)))
                .unwrap()
        })
        .collect();

    for (i, reply) in replies.into_iter().enumerate() {
        match reply.wait().unwrap() {
            EncodeOutcome::Compressed { bytes, .. } => {
                let back = engine.maybe_decode(&bytes, format!("k{i}").as_bytes()).unwrap();
                assert_eq!(back, values[i]);
            }
            EncodeOutcome::PassThrough => panic!("json must compress"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: fail-fast overflow rejects rather than blocking
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn fail_fast_overflow_rejects() {
    let mut c = cfg();
    c.async_thread_pool_size = 1;
    c.async_queue_size = 1;
    c.async_fail_fast = true;
    let engine = Engine::new(c).unwrap();

    // Large enough payloads that workers lag behind a tight submit loop.
    let value = dictcache::lorem::json_payload(3, 512 * 1024);
    let mut accepted = Vec::new();
    let mut rejected = 0;
    for i in 0..32 {
        match engine.encode_async(format!("k{i}").as_bytes(), &value, None) {
            Ok(reply) => accepted.push(reply),
            Err(AsyncError::Rejected) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(rejected > 0, "bounded queue must reject under pressure");
    assert!(!accepted.is_empty(), "accepted submissions must exist");
    for reply in accepted {
        assert!(matches!(
            reply.wait().unwrap(),
            EncodeOutcome::Compressed { .. }
        ));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: disabled pool rejects submissions outright
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn disabled_pool_rejects() {
    let mut c = cfg();
    c.async_cmd_enabled = false;
    let engine = Engine::new(c).unwrap();
    assert!(matches!(
        engine.encode_async(b"k", b"value", None),
        Err(AsyncError::Rejected)
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: expired timeout surfaces a synthetic failure
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn zero_timeout_expires() {
    let engine = Engine::new(cfg()).unwrap();
    // Saturate the pool so the probe request sits in the queue longer than
    // its zero timeout.
    let big = dictcache::lorem::json_payload(4, 1024 * 1024);
    let _busy: Vec<_> = (0..8)
        .filter_map(|i| {
            engine
                .encode_async(format!("b{i}").as_bytes(), &big, None)
                .ok()
        })
        .collect();

    let reply = engine
        .encode_async(b"probe", &big, Some(Duration::ZERO))
        .unwrap();
    assert!(matches!(reply.wait(), Err(AsyncError::Timeout)));
}
