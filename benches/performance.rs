//! Performance benchmarks for framing, dispatch, and list diffs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crossbeam_channel::unbounded;
use livestore::proto::{CreateRequest, GetRequest};
use livestore::store::{WatchId, Watcher};
use livestore::types::OBJECT_ID_LEN;
use livestore::{
    ConnectionId, ConnectionIds, FrameDecoder, ListQuery, MemoryStore, ObjectId, ObjectSnapshot,
    ObjectUpdate, Outbox, QueryId, Request, RequestBody, Session, StoreClient, Value,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn oid(n: u32) -> ObjectId {
    let mut bytes = [0u8; OBJECT_ID_LEN];
    bytes[..4].copy_from_slice(&n.to_be_bytes());
    ObjectId(bytes)
}

fn create_frame(n: u32) -> Vec<u8> {
    let mut attr = BTreeMap::new();
    attr.insert("name".to_string(), Value::from(format!("object-{}", n)));
    Request::new(RequestBody::Create(CreateRequest {
        id: oid(n),
        parent: None,
        tags: vec!["bench".to_string()],
        attr,
        data: BTreeMap::new(),
        bindata: Some(vec![0u8; 64]),
        pos_start: 0,
        pos_end: 10,
    }))
    .with_rid(n as u64)
    .encode()
    .unwrap()
}

/// Benchmark splitting a stream into frames with varying read sizes
fn bench_frame_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decoding");
    let stream: Vec<u8> = (0..1000).flat_map(create_frame).collect();

    for chunk in [64, 4096, 65536] {
        group.bench_with_input(BenchmarkId::new("chunk_bytes", chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                let mut frames = 0;
                for piece in stream.chunks(chunk) {
                    decoder.feed(piece);
                    while let Some(frame) = decoder.next_frame().unwrap() {
                        black_box(frame);
                        frames += 1;
                    }
                }
                assert_eq!(frames, 1000);
            });
        });
    }

    group.finish();
}

/// Benchmark decode + dispatch of get requests against a populated store
fn bench_dispatch(c: &mut Criterion) {
    let store = Arc::new(MemoryStore::new());
    for n in 0..1000 {
        store.create(ObjectSnapshot::new(oid(n)).with_attr("n", n as i64)).unwrap();
    }
    let frames: Vec<Vec<u8>> = (0..1000)
        .map(|n| {
            Request::new(RequestBody::Get(GetRequest {
                qid: QueryId(n as u64),
                id: oid(n),
                sub: false,
            }))
            .encode()
            .unwrap()
        })
        .collect();

    c.bench_function("dispatch_get_1000", |b| {
        let ids = ConnectionIds::new();
        let (outbox, replies) = Outbox::bounded(2048);
        let (mut session, _events) = Session::new(store.clone(), &ids, outbox);
        b.iter(|| {
            for frame in &frames {
                session.handle_frame(frame).unwrap();
            }
            black_box(replies.try_iter().count());
        });
    });
}

/// Benchmark list diff computation with varying numbers of standing queries
fn bench_list_diffs(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_diffs");

    for queries in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("queries", queries), &queries, |b, &queries| {
            let store = MemoryStore::new();
            let parent = oid(0);
            store.create(ObjectSnapshot::new(parent)).unwrap();
            for n in 1..=200 {
                store
                    .create(ObjectSnapshot::new(oid(n)).with_parent(parent).with_pos(n as i64, n as i64 + 5))
                    .unwrap();
            }

            let (tx, rx) = unbounded();
            for serial in 0..queries {
                let query = ListQuery {
                    pos_start: Some(serial as i64),
                    pos_end: Some(serial as i64 + 50),
                    ..ListQuery::children_of(Some(parent))
                };
                let id = WatchId {
                    conn: ConnectionId(1),
                    serial,
                };
                store
                    .run_list_query(&query, Some(Watcher::new(id, QueryId(serial), tx.clone())))
                    .unwrap();
            }

            let mut toggle = false;
            b.iter(|| {
                toggle = !toggle;
                let pos = if toggle { 500 } else { 20 };
                store
                    .update(&oid(20), vec![ObjectUpdate::SetPos(livestore::PosRange::new(pos, pos + 5))])
                    .unwrap();
                black_box(rx.try_iter().count());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_decoding, bench_dispatch, bench_list_diffs);
criterion_main!(benches);
