//! Benchmarks for `Pool::with_permit`'s acquire/release round trip (spec.md
//! §4.3), the hottest path in the crate per spec.md §2's ~22% share estimate.
//! Uses a synthetic `Permitted` resource so the benchmark measures pool
//! overhead in isolation from real HTTP/2 I/O (the teacher's own benches,
//! e.g. `correlation_simple.rs`, take the same "bench the manager, fake the
//! transport" approach).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use futures::future::BoxFuture;
use tokio::runtime::Runtime;

use pushkit::config::PoolConfig;
use pushkit::error::ConnectError;
use pushkit::pool::{Factory, Pool, Permitted};

#[derive(Debug, Clone)]
struct BenchResource {
    permits: Arc<AtomicU32>,
    alive: Arc<AtomicBool>,
}

impl Permitted for BenchResource {
    type Handle = Arc<AtomicU32>;

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_should_acquire(&self) -> bool {
        self.permits.load(Ordering::SeqCst) < 50
    }

    fn is_can_acquire(&self) -> bool {
        self.permits.load(Ordering::SeqCst) < 100
    }

    fn maximum_permits(&self) -> u32 {
        100
    }

    fn acquire(&mut self) {
        self.permits.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&mut self) {
        self.permits.fetch_sub(1, Ordering::SeqCst);
    }

    fn handle(&self) -> Arc<AtomicU32> {
        self.permits.clone()
    }
}

#[derive(Debug)]
struct BenchFactory;

impl Factory<BenchResource> for BenchFactory {
    fn make(&self) -> BoxFuture<'static, Result<BenchResource, ConnectError>> {
        Box::pin(async {
            Ok(BenchResource {
                permits: Arc::new(AtomicU32::new(0)),
                alive: Arc::new(AtomicBool::new(true)),
            })
        })
    }

    fn recycle(&self, _item: BenchResource) {}

    fn close(&self) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

fn runtime() -> Runtime {
    Runtime::new().expect("failed to create tokio runtime")
}

fn benchmark_uncontended_with_permit(c: &mut Criterion) {
    let rt = runtime();
    let pool = rt.block_on(async {
        let pool = Pool::new(PoolConfig::new("bench-uncontended", 1, 4), Arc::new(BenchFactory));
        pool.prepare().await.unwrap();
        pool
    });

    c.bench_function("pool_with_permit_uncontended", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = pool
                    .with_permit(Duration::from_secs(1), |handle| async move {
                        handle.load(Ordering::SeqCst)
                    })
                    .await
                    .unwrap();
                black_box(result);
            })
        });
    });
}

fn benchmark_contended_with_permit(c: &mut Criterion) {
    let rt = runtime();
    let pool = rt.block_on(async {
        let pool = Pool::new(PoolConfig::new("bench-contended", 1, 4), Arc::new(BenchFactory));
        pool.prepare().await.unwrap();
        pool
    });

    c.bench_function("pool_with_permit_16_concurrent_callers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::new();
                for _ in 0..16 {
                    let pool = pool.clone();
                    handles.push(tokio::spawn(async move {
                        pool.with_permit(Duration::from_secs(1), |handle| async move {
                            handle.load(Ordering::SeqCst)
                        })
                        .await
                    }));
                }
                for h in handles {
                    black_box(h.await.unwrap().unwrap());
                }
            })
        });
    });
}

criterion_group!(benches, benchmark_uncontended_with_permit, benchmark_contended_with_permit);
criterion_main!(benches);
