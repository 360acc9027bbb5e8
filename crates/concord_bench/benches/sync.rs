//! Server reconciliation and wire format benchmarks.

use concord_bench::utils::{concurrent_inserts, text_of};
use concord_ot::{DocumentId, DocumentState, UserId};
use concord_sync_protocol::{decode_frame, encode_frame, Handshake, PushRequest, SyncMessage};
use concord_sync_server::SyncServer;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn open(server: &SyncServer, content: &str) -> DocumentId {
    let id = DocumentId::new("bench");
    server
        .handle_handshake(&Handshake::new(
            id.clone(),
            UserId::new("bench"),
            DocumentState::text(content),
        ))
        .unwrap();
    id
}

/// Benchmark a push that must be transformed against concurrent history.
fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    for concurrent in [10, 100].iter() {
        let text = text_of(1000);
        let history = concurrent_inserts("alice", 1000, *concurrent);
        let batch = concurrent_inserts("bob", 1000, 10);
        group.throughput(Throughput::Elements(batch.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(concurrent), &batch, |bench, batch| {
            bench.iter_batched(
                || {
                    let server = SyncServer::default();
                    let id = open(&server, &text);
                    // Each history entry is generated against the previous head.
                    for (version, op) in history.iter().enumerate() {
                        server
                            .handle_push(&PushRequest {
                                document_id: id.clone(),
                                operations: vec![op.clone()],
                                local_version: 1,
                                server_version: version as u64,
                            })
                            .unwrap();
                    }
                    (server, id)
                },
                |(server, id)| {
                    let ack = server
                        .handle_push(&PushRequest {
                            document_id: id,
                            operations: batch.clone(),
                            local_version: batch.len() as u64,
                            server_version: 0,
                        })
                        .unwrap();
                    black_box(ack);
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark framing a push request.
fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("frames");

    for count in [1, 10, 100].iter() {
        let message = SyncMessage::Push(PushRequest {
            document_id: DocumentId::new("bench"),
            operations: concurrent_inserts("alice", 1000, *count),
            local_version: *count as u64,
            server_version: 0,
        });
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("encode", count), &message, |bench, message| {
            bench.iter(|| black_box(encode_frame(black_box(message)).unwrap()));
        });

        let frame = encode_frame(&message).unwrap();
        group.bench_with_input(BenchmarkId::new("decode", count), &frame, |bench, frame| {
            bench.iter(|| black_box(decode_frame(black_box(frame)).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reconcile, bench_frames);
criterion_main!(benches);
