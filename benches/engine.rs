//! Criterion benchmarks for the encode/decode hot path.
//!
//! Run with:
//!   cargo bench --bench engine

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dictcache::{Config, EncodeOutcome, Engine};

fn quiet_engine() -> Engine {
    let mut cfg = Config::default();
    cfg.enable_training = false;
    cfg.enable_sampling = false;
    cfg.min_comp_size = 32;
    Engine::new(cfg).expect("engine")
}

fn bench_encode_decode(c: &mut Criterion) {
    let engine = quiet_engine();
    let mut group = c.benchmark_group("engine_encode_decode");

    for &size in &[1_024usize, 16_384, 262_144] {
        let value = dictcache::lorem::json_payload(42, size);

        group.throughput(Throughput::Bytes(value.len() as u64));
        group.bench_with_input(BenchmarkId::new("maybe_encode", size), &value, |b, v| {
            b.iter(|| engine.maybe_encode(b"bench:key", v))
        });

        let EncodeOutcome::Compressed { bytes, .. } = engine.maybe_encode(b"bench:key", &value)
        else {
            panic!("bench payload must compress");
        };
        group.throughput(Throughput::Bytes(value.len() as u64));
        group.bench_with_input(BenchmarkId::new("maybe_decode", size), &bytes, |b, f| {
            b.iter(|| engine.maybe_decode(f, b"bench:key").unwrap())
        });
    }
    group.finish();
}

fn bench_probe(c: &mut Criterion) {
    let mut group = c.benchmark_group("incompressibility_probe");

    let text = dictcache::lorem::ascii_text(1, 4096);
    let noise = dictcache::lorem::noise(2, 4096);

    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_with_input(BenchmarkId::new("probe", "ascii"), &text, |b, v| {
        b.iter(|| dictcache::codec::probe::is_compressible(v))
    });
    group.throughput(Throughput::Bytes(noise.len() as u64));
    group.bench_with_input(BenchmarkId::new("probe", "noise"), &noise, |b, v| {
        b.iter(|| dictcache::codec::probe::is_compressible(v))
    });
    group.finish();
}

criterion_group!(benches, bench_encode_decode, bench_probe);
criterion_main!(benches);
