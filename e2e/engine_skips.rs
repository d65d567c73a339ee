//! E2E Test Suite 02: pass-through paths and skip counters.
//!
//! Size gates, the incompressibility probe, the no-gain tie-break, and the
//! corresponding counters.

use dictcache::{Config, EncodeOutcome, Engine};

fn cfg() -> Config {
    let mut cfg = Config::default();
    cfg.enable_training = false;
    cfg.enable_sampling = false;
    cfg.min_comp_size = 32;
    cfg.max_comp_size = 64 * 1024;
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: below minimum size
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn below_min_size_is_passed_through() {
    let engine = Engine::new(cfg()).unwrap();
    assert_eq!(engine.maybe_encode(b"a", b"hi"), EncodeOutcome::PassThrough);
    let stats = engine.snapshot_stats(Some("")).unwrap();
    assert_eq!(stats.skipped_comp_min_size, 1);
    assert_eq!(stats.bytes_raw_total, 0, "pass-through counts no bytes");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: above maximum size
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn above_max_size_is_passed_through() {
    let engine = Engine::new(cfg()).unwrap();
    let huge = dictcache::lorem::ascii_text(1, 128 * 1024);
    assert_eq!(engine.maybe_encode(b"k", &huge), EncodeOutcome::PassThrough);
    let stats = engine.snapshot_stats(Some("")).unwrap();
    assert_eq!(stats.skipped_comp_max_size, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: incompressible payload skips the codec
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn incompressible_payload_is_skipped() {
    let engine = Engine::new(cfg()).unwrap();
    let noise = dictcache::lorem::noise(7, 2048);
    assert_eq!(engine.maybe_encode(b"k", &noise), EncodeOutcome::PassThrough);
    let stats = engine.snapshot_stats(Some("")).unwrap();
    assert_eq!(stats.skipped_comp_incomp, 1);
    assert_eq!(stats.errs_compress, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: boundary sizes compress, off-by-one sizes do not
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn size_gates_are_inclusive_bounds() {
    let engine = Engine::new(cfg()).unwrap();

    // Exactly min_comp_size and highly redundant: eligible and accepted.
    let at_min = vec![b'a'; 32];
    assert!(matches!(
        engine.maybe_encode(b"k", &at_min),
        EncodeOutcome::Compressed { .. }
    ));

    // One byte short: pass-through.
    let below = vec![b'a'; 31];
    assert_eq!(engine.maybe_encode(b"k", &below), EncodeOutcome::PassThrough);

    // Exactly max_comp_size: eligible.
    let at_max = dictcache::lorem::ascii_text(4, 64 * 1024);
    assert!(matches!(
        engine.maybe_encode(b"k", &at_max),
        EncodeOutcome::Compressed { .. }
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4b: compression that does not shrink the value is rejected
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn no_gain_prefers_pass_through() {
    let engine = Engine::new(cfg()).unwrap();
    // 48 bytes of noise: short enough to bypass the probe, random enough
    // that the codec cannot shave the 2-byte header off.
    let value = dictcache::lorem::noise(13, 48);
    assert_eq!(engine.maybe_encode(b"k", &value), EncodeOutcome::PassThrough);
    let stats = engine.snapshot_stats(Some("")).unwrap();
    assert_eq!(stats.skipped_comp_nogain, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: every skip leaves the stored value untouched for reads
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn skipped_values_roundtrip_as_raw_frames() {
    let engine = Engine::new(cfg()).unwrap();
    // The adapter stores raw on pass-through; a raw frame built by the host
    // must still decode verbatim.
    let noise = dictcache::lorem::noise(11, 1024);
    assert_eq!(engine.maybe_encode(b"k", &noise), EncodeOutcome::PassThrough);

    let mut frame = vec![0xFF, 0xFF];
    frame.extend_from_slice(&noise);
    assert_eq!(engine.maybe_decode(&frame, b"k").unwrap(), noise);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: counters accumulate per namespace
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn skip_counters_accumulate_per_namespace() {
    let engine = Engine::new(cfg()).unwrap();
    engine.set_namespaces(&["u:", "p:"]);

    for i in 0..3 {
        engine.maybe_encode(format!("u:{i}").as_bytes(), b"x");
    }
    engine.maybe_encode(b"p:1", b"y");

    assert_eq!(
        engine.snapshot_stats(Some("u:")).unwrap().skipped_comp_min_size,
        3
    );
    assert_eq!(
        engine.snapshot_stats(Some("p:")).unwrap().skipped_comp_min_size,
        1
    );
    assert_eq!(
        engine.snapshot_stats(None).unwrap().skipped_comp_min_size,
        4,
        "aggregate sums namespaces"
    );
}
