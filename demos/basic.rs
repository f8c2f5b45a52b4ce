//! Basic usage examples for the lock pool, resource pools and retry policies

use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use esox_resourcepool::{
    DynamicPoolOptions, DynamicResourcePool, ExponentialBackoffRetry, FnFactory, GcPolicy,
    LockMode, LockPool, LockPoolOptions, MetricsExporter, Pool, ResourcePool, retry,
};

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    println!("=== Esox Resource Pool - Basic Examples ===\n");

    // Example 1: Keyed locks
    keyed_locks();

    // Example 2: Fixed-capacity pool with scoped handles
    fixed_pool();

    // Example 3: Dynamic pool with garbage collection and metrics
    dynamic_pool();

    // Example 4: Retrying a flaky operation
    retrying();
}

fn keyed_locks() {
    println!("1. Keyed Locks:");
    let locks = LockPool::new(LockPoolOptions::new().with_watermarks(2, 4)).unwrap();

    {
        let _read1 = locks.get("blob-1", LockMode::Read);
        let _read2 = locks.get("blob-1", LockMode::Read);
        println!("   Two readers share blob-1");
        println!("   Writer can enter: {}", locks.try_get("blob-1", LockMode::Write).is_some());
    }

    for key in ["a", "b", "c", "d", "e"] {
        drop(locks.get(key, LockMode::Write));
    }
    std::thread::sleep(Duration::from_millis(50));
    println!("   {}\n", locks);
}

fn fixed_pool() {
    println!("2. Fixed-Capacity Pool:");
    let pool = Arc::new(
        ResourcePool::new(2, FnFactory::new(|| Ok::<_, Infallible>(Vec::<u8>::with_capacity(4096)))).unwrap(),
    );

    {
        let mut buffer = pool.acquire_scoped().unwrap();
        buffer.extend_from_slice(b"payload");
        println!("   Buffer holds {} bytes", buffer.len());
    }

    let first = pool.acquire().unwrap();
    let second = pool.acquire().unwrap();
    match pool.acquire_timeout(Duration::from_millis(20)) {
        Ok(_) => println!("   Unexpected third buffer"),
        Err(e) => println!("   Third acquire failed: {}", e),
    }
    pool.release(first).unwrap();
    pool.release(second).unwrap();
    println!("   Pool size: {}\n", pool.size());
}

fn dynamic_pool() {
    println!("3. Dynamic Pool:");
    let next = AtomicU32::new(1);
    let factory = FnFactory::new(move || Ok::<_, Infallible>(next.fetch_add(1, Ordering::SeqCst)));
    let options = DynamicPoolOptions::new()
        .with_capacity(1, 8)
        .with_gc_policy(GcPolicy::IdleTimeout(Duration::from_millis(10)))
        .with_gc_schedule(Duration::from_millis(20), Duration::from_millis(20));
    let pool = DynamicResourcePool::new(factory, options).unwrap();

    let sessions: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
    println!("   Opened sessions {:?}", sessions);
    for session in sessions {
        pool.release(session).unwrap();
    }

    std::thread::sleep(Duration::from_millis(100));
    println!("   Size after garbage collection: {}", pool.size());
    println!(
        "   Prometheus export:\n{}",
        MetricsExporter::export_prometheus(&pool.metrics(), "sessions", None)
    );
}

fn retrying() {
    println!("4. Retry:");
    let attempts = AtomicU32::new(0);
    let mut policy = ExponentialBackoffRetry::new(Duration::from_millis(1), Duration::from_millis(20), 5);

    let result = retry(
        "connect to replica",
        || {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(io::Error::other("connection refused"))
            } else {
                Ok("connected")
            }
        },
        &mut policy,
    );
    println!("   {:?} after {} attempts", result.map_err(|e| e.to_string()), attempts.load(Ordering::SeqCst));
}
