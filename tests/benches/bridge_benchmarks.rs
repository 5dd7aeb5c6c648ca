//! # Webbridge Benchmarks
//!
//! | Area | Operation | Target |
//! |------|-----------|--------|
//! | Codec | decode one response envelope | < 5µs |
//! | Correlation table | register + resolve | < 2µs |
//! | Client | direct call with synchronous reply | < 50µs |
//! | Client | queued call with synchronous reply | < 100µs |

use std::sync::Arc;
use std::time::Duration;

use bridge_ipc::channel::memory;
use bridge_ipc::{
    create_request, create_success_response, decode, encode_request, encode_response,
    BridgeClient, BridgeConfig, CorrelationTable, Envelope, InvokeOptions, Priority, RequestId,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

// ============================================================================
// Codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let request = create_request("get_all", Some(json!({"page": 1, "token": "abc"})), None);
    let raw_request = encode_request(&request).unwrap();
    let response = create_success_response(
        request.id.clone(),
        json!((0..50).map(|i| json!({"id": i, "title": "task"})).collect::<Vec<_>>()),
    );
    let raw_response = encode_response(&response).unwrap();

    group.bench_function("encode_request", |b| {
        b.iter(|| black_box(encode_request(&request).unwrap()))
    });
    group.bench_function("decode_request", |b| {
        b.iter(|| black_box(decode(&raw_request).unwrap()))
    });
    group.throughput(Throughput::Bytes(raw_response.len() as u64));
    group.bench_function("decode_response_50_items", |b| {
        b.iter(|| black_box(decode(&raw_response).unwrap()))
    });
    group.finish();
}

// ============================================================================
// Correlation table
// ============================================================================

fn bench_correlation(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlation");

    for outstanding in [0usize, 100, 900] {
        let table = CorrelationTable::new(1000);
        let _held: Vec<_> = (0..outstanding)
            .map(|i| table.register(RequestId::new(format!("held-{}", i)), "m").unwrap())
            .collect();

        group.bench_with_input(
            BenchmarkId::new("register_resolve", outstanding),
            &outstanding,
            |b, _| {
                b.iter(|| {
                    let id = RequestId::generate();
                    let mut rx = table.register(id.clone(), "get_all").unwrap();
                    table.resolve(create_success_response(id, json!(1)));
                    black_box(rx.try_recv().unwrap())
                })
            },
        );
    }
    group.finish();
}

// ============================================================================
// Client round trips
// ============================================================================

fn echo_client() -> (BridgeClient, memory::MemoryBackend) {
    let client = BridgeClient::new(BridgeConfig::default()).unwrap();
    let (sender, receiver, backend) = memory::pair_with_responder(1024, |raw| {
        let Ok(Envelope::Request(req)) = decode(raw) else {
            return None;
        };
        encode_response(&create_success_response(req.id, json!("ok"))).ok()
    });
    client
        .attach_channel(Arc::new(sender), Arc::new(receiver))
        .unwrap();
    (client, backend)
}

fn bench_round_trip(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let (client, mut backend) = runtime.block_on(async { echo_client() });

    // Drain what the backend side receives so the channel never fills
    runtime.spawn(async move { while backend.recv().await.is_some() {} });

    let mut group = c.benchmark_group("client");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("direct_sync_reply", |b| {
        b.iter(|| {
            runtime
                .block_on(client.invoke("get_all", None, InvokeOptions::default()))
                .unwrap()
        })
    });
    group.bench_function("queued_sync_reply", |b| {
        b.iter(|| {
            runtime
                .block_on(client.invoke(
                    "get_all",
                    None,
                    InvokeOptions::new().with_priority(Priority::High),
                ))
                .unwrap()
        })
    });
    group.finish();

    client.dispose();
}

criterion_group!(benches, bench_codec, bench_correlation, bench_round_trip);
criterion_main!(benches);
