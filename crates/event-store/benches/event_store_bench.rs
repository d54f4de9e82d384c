use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{EventEnvelope, EventStore, EventStoreExt, InMemoryEventStore, Version};

fn make_event(aggregate_id: AggregateId) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Account")
        .event_type("MoneyDeposited")
        .version(Version::initial())
        .payload_raw(serde_json::json!({
            "type": "MoneyDeposited",
            "data": { "amount": 500 }
        }))
        .build()
        .unwrap()
}

fn populated_store(
    rt: &tokio::runtime::Runtime,
    streams: usize,
    per_stream: usize,
) -> (InMemoryEventStore, AggregateId) {
    let store = InMemoryEventStore::new();
    let mut last = AggregateId::new();
    rt.block_on(async {
        for _ in 0..streams {
            let id = AggregateId::new();
            let events = (0..per_stream).map(|_| make_event(id)).collect();
            store.append(id, events, Version::initial()).await.unwrap();
            last = id;
        }
    });
    (store, last)
}

fn bench_append(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let id = AggregateId::new();
                store
                    .append(id, vec![make_event(id)], Version::initial())
                    .await
                    .unwrap();
            });
        });
    });

    c.bench_function("event_store/append_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let id = AggregateId::new();
                let events = (0..10).map(|_| make_event(id)).collect();
                store.append(id, events, Version::initial()).await.unwrap();
            });
        });
    });
}

fn bench_load(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, id) = populated_store(&rt, 1, 100);

    c.bench_function("event_store/load_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.load(id).await.unwrap();
            });
        });
    });

    c.bench_function("event_store/load_from_version_50", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.load_from(id, Version::new(50)).await.unwrap();
            });
        });
    });
}

fn bench_load_all(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, _) = populated_store(&rt, 10, 100);

    c.bench_function("event_store/load_all_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let events = store.load_all().await.unwrap();
                assert_eq!(events.len(), 1000);
            });
        });
    });
}

criterion_group!(benches, bench_append, bench_load, bench_load_all);
criterion_main!(benches);
