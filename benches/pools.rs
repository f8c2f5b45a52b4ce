use criterion::{Criterion, black_box, criterion_group, criterion_main};
use esox_resourcepool::{
    DynamicPoolOptions, DynamicResourcePool, FnFactory, LockMode, LockPool, LockPoolOptions,
    ResourcePool,
};

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};

fn lock_pool_uncontended(c: &mut Criterion) {
    let pool = LockPool::new(LockPoolOptions::default()).unwrap();

    c.bench_function("lock_pool_write_same_key", |b| {
        b.iter(|| {
            let guard = pool.get(black_box(42u64), LockMode::Write);
            drop(guard);
        })
    });

    let mut key = 0u64;
    c.bench_function("lock_pool_read_distinct_keys", |b| {
        b.iter(|| {
            key = (key + 1) % 10_000;
            let guard = pool.get(black_box(key), LockMode::Read);
            drop(guard);
        })
    });
}

// Small watermarks keep the evictor running during the measurement.
fn lock_pool_with_eviction(c: &mut Criterion) {
    let pool = LockPool::new(LockPoolOptions::new().with_watermarks(512, 1024)).unwrap();
    let mut key = 0u64;

    c.bench_function("lock_pool_churn_over_watermark", |b| {
        b.iter(|| {
            key += 1;
            drop(pool.get(black_box(key), LockMode::Write));
        })
    });
}

fn resource_pools(c: &mut Criterion) {
    let fixed = ResourcePool::new(16, FnFactory::new(|| Ok::<_, Infallible>(vec![0u8; 1024]))).unwrap();
    c.bench_function("resource_pool_acquire_release", |b| {
        b.iter(|| {
            let buffer = fixed.acquire().unwrap();
            fixed.release(black_box(buffer)).unwrap();
        })
    });

    let next = AtomicU64::new(0);
    let dynamic = DynamicResourcePool::new(
        FnFactory::new(move || Ok::<_, Infallible>(next.fetch_add(1, Ordering::Relaxed))),
        DynamicPoolOptions::new().with_capacity(1, 16),
    )
    .unwrap();
    c.bench_function("dynamic_pool_acquire_release", |b| {
        b.iter(|| {
            let id = dynamic.acquire().unwrap();
            dynamic.release(black_box(id)).unwrap();
        })
    });
}

criterion_group!(benches, lock_pool_uncontended, lock_pool_with_eviction, resource_pools);
criterion_main!(benches);
