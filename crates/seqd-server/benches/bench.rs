use core::{hint::black_box, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::stream::{FuturesUnordered, StreamExt};
use seqd_core::{
    BucketKey,
    protocol::AllocationRequest,
    store::memory::{MemoryBuffer, MemoryCounter},
};
use seqd_server::server::{
    config::EngineConfig,
    connection::listener::Listener,
    engine::{Engine, refill::Refiller},
};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    runtime::Builder,
};

#[derive(Clone, Copy, Debug)]
struct TcpBenchParams {
    requests_per_client: u64,
    concurrency: usize,
}

fn engine_bench(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let key = BucketKey::new("bench", "b1").unwrap();

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(1));

    group.bench_function("allocate", |b| {
        b.to_async(&rt).iter_custom(|iters| {
            let key = key.clone();
            async move {
                let buffer = Arc::new(MemoryBuffer::new());
                buffer.seed(&key, 1..=iters);
                let engine = Engine::new(
                    buffer,
                    Arc::new(MemoryCounter::new()),
                    EngineConfig::default(),
                );

                let start = Instant::now();
                for _ in 0..iters {
                    black_box(engine.allocator().allocate(&key).await.unwrap());
                }
                start.elapsed()
            }
        });
    });

    group.bench_function("refill/step/100", |b| {
        b.to_async(&rt).iter_custom(|iters| {
            let key = key.clone();
            async move {
                let refiller = Refiller::new(
                    Arc::new(MemoryBuffer::new()),
                    Arc::new(MemoryCounter::new()),
                );

                let start = Instant::now();
                for _ in 0..iters {
                    black_box(refiller.refill(&key, 100).await.unwrap());
                }
                start.elapsed()
            }
        });
    });

    group.finish();
}

fn tcp_bench(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let config = EngineConfig {
        tick_interval: Duration::from_millis(1),
        default_step: 10_000,
        ..EngineConfig::default()
    };
    let engine = Arc::new(Engine::new(
        Arc::new(MemoryBuffer::new()),
        Arc::new(MemoryCounter::new()),
        config,
    ));
    let addr = rt.block_on(async {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(listener.serve(engine));
        addr
    });

    let mut cases = Vec::new();
    for &requests_per_client in &[100, 1_000] {
        for &concurrency in &[1, 4, 16] {
            cases.push(TcpBenchParams {
                requests_per_client,
                concurrency,
            });
        }
    }

    for params in cases {
        let mut group = c.benchmark_group("tcp/allocate");
        group.throughput(Throughput::Elements(
            params.requests_per_client * params.concurrency as u64,
        ));
        group.bench_function(
            format!(
                "reqs/{}/conc/{}",
                params.requests_per_client, params.concurrency
            ),
            |b| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let start = Instant::now();
                    for _ in 0..iters {
                        run_tcp_bench(addr, params).await;
                    }
                    start.elapsed()
                });
            },
        );
        group.finish();
    }
}

async fn run_tcp_bench(addr: SocketAddr, params: TcpBenchParams) {
    let request = AllocationRequest::new("bench", "tcp", 0).encode().unwrap() + "\n";

    let mut tasks: FuturesUnordered<_> = (0..params.concurrency)
        .map(|_| {
            let request = request.clone();
            async move {
                let stream = TcpStream::connect(addr).await.unwrap();
                stream.set_nodelay(true).unwrap();
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();

                for _ in 0..params.requests_per_client {
                    write.write_all(request.as_bytes()).await.unwrap();
                    black_box(lines.next_line().await.unwrap());
                }
            }
        })
        .collect();

    while tasks.next().await.is_some() {}
}

criterion_group!(benches, engine_bench, tcp_bench);
criterion_main!(benches);
