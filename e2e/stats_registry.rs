//! E2E Test Suite 05: statistics registry rebuilds.
//!
//! Rebuilding the namespace set must preserve counters for retained
//! namespaces, zero new ones, and keep the aggregate consistent.

use dictcache::{Config, Engine};

fn cfg() -> Config {
    let mut cfg = Config::default();
    cfg.enable_training = false;
    cfg.enable_sampling = false;
    cfg.min_comp_size = 32;
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: rebuild preserves retained counters and zeroes new namespaces
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn rebuild_preserves_retained_counters() {
    let engine = Engine::new(cfg()).unwrap();
    engine.set_namespaces(&["u:"]);

    for i in 0..100 {
        engine.maybe_encode(format!("u:{i}").as_bytes(), b"small");
    }
    assert_eq!(engine.snapshot_stats(Some("u:")).unwrap().writes, 100);

    engine.set_namespaces(&["u:", "p:"]);
    let u = engine.snapshot_stats(Some("u:")).unwrap();
    let p = engine.snapshot_stats(Some("p:")).unwrap();
    assert_eq!(u.writes, 100, "retained namespace keeps its counters");
    assert_eq!(p.writes, 0, "new namespace starts zeroed");
    assert_eq!(p.skipped_comp_min_size, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: removed namespaces vanish from lookups; traffic falls to default
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn removed_namespace_routes_to_default() {
    let engine = Engine::new(cfg()).unwrap();
    engine.set_namespaces(&["u:", "p:"]);
    engine.maybe_encode(b"p:1", b"x");
    assert_eq!(engine.snapshot_stats(Some("p:")).unwrap().writes, 1);

    engine.set_namespaces(&["u:"]);
    assert!(engine.snapshot_stats(Some("p:")).is_none());
    assert_eq!(engine.list_namespaces(), vec!["u:".to_string()]);

    let default_before = engine.snapshot_stats(Some("")).unwrap().writes;
    engine.maybe_encode(b"p:2", b"y");
    assert_eq!(
        engine.snapshot_stats(Some("")).unwrap().writes,
        default_before + 1,
        "unclaimed prefix falls to the default block"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: a namespace removed and re-added starts from zero
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn readded_namespace_is_zeroed() {
    let engine = Engine::new(cfg()).unwrap();
    engine.set_namespaces(&["u:"]);
    for i in 0..10 {
        engine.maybe_encode(format!("u:{i}").as_bytes(), b"v");
    }
    engine.set_namespaces(&[] as &[&str]);
    engine.set_namespaces(&["u:"]);
    assert_eq!(engine.snapshot_stats(Some("u:")).unwrap().writes, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: aggregate equals the sum over blocks
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn aggregate_is_sum_of_blocks() {
    let engine = Engine::new(cfg()).unwrap();
    engine.set_namespaces(&["u:", "p:"]);

    for i in 0..7 {
        engine.maybe_encode(format!("u:{i}").as_bytes(), b"v");
    }
    for i in 0..5 {
        engine.maybe_encode(format!("p:{i}").as_bytes(), b"v");
    }
    engine.maybe_encode(b"other", b"v");

    let agg = engine.snapshot_stats(None).unwrap();
    assert_eq!(agg.namespace, "*");
    assert_eq!(agg.writes, 13);

    let by_parts = engine.snapshot_stats(Some("u:")).unwrap().writes
        + engine.snapshot_stats(Some("p:")).unwrap().writes
        + engine.snapshot_stats(Some("")).unwrap().writes;
    assert_eq!(agg.writes, by_parts);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: longest prefix wins the counter attribution
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn longest_prefix_attribution() {
    let engine = Engine::new(cfg()).unwrap();
    engine.set_namespaces(&["u:", "u:img:"]);

    engine.maybe_encode(b"u:img:1", b"v");
    engine.maybe_encode(b"u:txt:1", b"v");

    assert_eq!(engine.snapshot_stats(Some("u:img:")).unwrap().writes, 1);
    assert_eq!(engine.snapshot_stats(Some("u:")).unwrap().writes, 1);
}
