use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use floodgate::{BucketConfig, MemoryStore, Store, TokenBucket};
use std::hint::black_box;
use std::time::Duration;

fn benchmark_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_key_allowed", |b| {
        // Refill keeps up with the benchmark loop, so every call admits.
        let bucket =
            TokenBucket::with_interval(1_000_000_000, 1_000_000_000, Duration::from_secs(1))
                .unwrap();

        b.iter(|| black_box(bucket.admit().allowed));
    });

    group.bench_function("single_key_denied", |b| {
        let bucket = TokenBucket::with_interval(5, 1, Duration::from_secs(3600)).unwrap();
        for _ in 0..5 {
            bucket.admit();
        }

        b.iter(|| black_box(bucket.admit().allowed));
    });

    group.bench_function("rotating_keys_100", |b| {
        let store = MemoryStore::with_capacity(100);
        let cfg = BucketConfig::with_interval(1_000_000, 1_000_000, Duration::from_secs(1));
        let mut counter = 0u64;

        b.iter(|| {
            let key = format!("key_{}", counter % 100);
            counter += 1;

            black_box(store.allow(black_box(&key), black_box(&cfg)).unwrap().allowed)
        });
    });

    group.finish();
}

fn benchmark_store_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_growth");
    group.throughput(Throughput::Elements(1));

    for num_keys in [10u64, 100, 1000, 10000] {
        group.bench_with_input(
            format!("unique_keys_{num_keys}"),
            &num_keys,
            |b, &num_keys| {
                let store = MemoryStore::with_capacity(num_keys as usize);
                let cfg = BucketConfig::with_interval(1_000_000, 1_000_000, Duration::from_secs(1));
                let mut counter = 0u64;

                b.iter(|| {
                    let key = format!("key_{}", counter % num_keys);
                    counter += 1;

                    black_box(store.allow(&key, &cfg).unwrap().allowed)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_admission, benchmark_store_growth);
criterion_main!(benches);
