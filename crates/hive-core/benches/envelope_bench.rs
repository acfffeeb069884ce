use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use hive_core::{
    DigestCache, Envelope, Flags, LoadBalancer, Topic, TtlDigestCache, expiry_after,
};
use hive_discovery::{Address, KadParams, Kademlia, Peer, PeerAddr};
use std::sync::Arc;
use std::time::Duration;

fn envelope(size: usize) -> Envelope {
    Envelope::new(
        Address::random().as_bytes().to_vec(),
        Topic::from_name("bench"),
        Flags::symmetric(),
        expiry_after(Duration::from_secs(3600)),
        vec![0x5a; size],
    )
    .unwrap()
}

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_digest");

    for size in [64, 1024, 64 * 1024] {
        let env = envelope(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &env, |b, env| {
            b.iter(|| black_box(env).digest())
        });
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_codec");

    for size in [64, 1024, 64 * 1024] {
        let env = envelope(size);
        let bytes = env.to_bytes().unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &env, |b, env| {
            b.iter(|| black_box(env).to_bytes().unwrap())
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &bytes, |b, bytes| {
            b.iter(|| Envelope::from_bytes(black_box(bytes), 1 << 20).unwrap())
        });
    }

    group.finish();
}

fn bench_digest_cache(c: &mut Criterion) {
    let cache = TtlDigestCache::new(Duration::from_secs(60));
    let digests: Vec<_> = (0..10_000).map(|_| envelope(16).digest()).collect();
    for digest in &digests {
        cache.add(*digest);
    }
    let missing = envelope(16).digest();

    let mut group = c.benchmark_group("digest_cache");
    group.bench_function("has_hit_10000", |b| {
        b.iter(|| cache.has(black_box(&digests[5_000])))
    });
    group.bench_function("has_miss_10000", |b| b.iter(|| cache.has(black_box(&missing))));
    group.finish();
}

fn bench_bins_desc(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_balancer_bins_desc");

    for n in [16, 128] {
        let kad = Arc::new(Kademlia::new(Address::random(), KadParams::default()).unwrap());
        for _ in 0..n {
            kad.on(Arc::new(Peer::new(PeerAddr::new(Address::random(), vec![]))));
        }
        let balancer = LoadBalancer::new(Arc::clone(&kad));
        let pivot = Address::random();
        group.bench_with_input(BenchmarkId::from_parameter(n), &balancer, |b, balancer| {
            b.iter(|| balancer.bins_desc(black_box(pivot.as_bytes())))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_digest,
    bench_codec,
    bench_digest_cache,
    bench_bins_desc
);
criterion_main!(benches);
