use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use event_bus::{BoxError, BusConfig, BusError, EventBus, EventHandler};
use event_store::{EventEnvelope, Version};
use tokio::sync::Mutex;

fn event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Account")
        .event_type("MoneyDeposited")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({"amount": version * 100}))
        .build()
        .unwrap()
}

fn quick_retries(config: BusConfig) -> BusConfig {
    config.with_retries(3, Duration::from_millis(1))
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<EventEnvelope>>,
}

impl Recorder {
    async fn versions(&self) -> Vec<i64> {
        self.seen
            .lock()
            .await
            .iter()
            .map(|e| e.version.as_i64())
            .collect()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), BoxError> {
        self.seen.lock().await.push(event.clone());
        Ok(())
    }
}

/// Fails the first `failures` calls, then records.
struct Flaky {
    failures: u32,
    calls: AtomicU32,
    recorder: Recorder,
}

impl Flaky {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            recorder: Recorder::default(),
        }
    }
}

#[async_trait]
impl EventHandler for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), BoxError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(format!("transient failure #{}", call + 1).into());
        }
        self.recorder.handle(event).await
    }
}

struct Broken;

#[async_trait]
impl EventHandler for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn handle(&self, _event: &EventEnvelope) -> Result<(), BoxError> {
        Err("read model unavailable".into())
    }
}

struct Panicking;

#[async_trait]
impl EventHandler for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn handle(&self, _event: &EventEnvelope) -> Result<(), BoxError> {
        panic!("handler bug");
    }
}

#[tokio::test]
async fn every_subscriber_sees_events_in_publish_order() {
    let bus = EventBus::new(BusConfig::default());
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    bus.subscribe(first.clone()).await;
    bus.subscribe(second.clone()).await;

    let id = AggregateId::new();
    bus.publish_all((1..=20).map(|v| event(id, v))).await.unwrap();
    bus.settle().await;

    let expected: Vec<i64> = (1..=20).collect();
    assert_eq!(first.versions().await, expected);
    assert_eq!(second.versions().await, expected);
}

#[tokio::test]
async fn failing_subscriber_does_not_affect_others() {
    let bus = EventBus::new(quick_retries(BusConfig::default()));
    let healthy = Arc::new(Recorder::default());
    bus.subscribe(Arc::new(Broken)).await;
    bus.subscribe(healthy.clone()).await;

    let id = AggregateId::new();
    bus.publish(event(id, 1)).await.unwrap();
    bus.publish(event(id, 2)).await.unwrap();
    bus.settle().await;

    assert_eq!(healthy.versions().await, vec![1, 2]);

    let dead = bus.dead_letters().await;
    assert_eq!(dead.len(), 2);
    assert!(dead.iter().all(|d| d.subscriber == "broken"));
    assert!(dead.iter().all(|d| d.attempts == 3));
    assert_eq!(dead[0].error, "read model unavailable");
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let bus = EventBus::new(quick_retries(BusConfig::default()));
    let flaky = Arc::new(Flaky::new(2));
    bus.subscribe(flaky.clone()).await;

    bus.publish(event(AggregateId::new(), 1)).await.unwrap();
    bus.settle().await;

    assert_eq!(flaky.recorder.versions().await, vec![1]);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    assert!(bus.dead_letters().await.is_empty());
}

#[tokio::test]
async fn dead_letters_can_be_redelivered() {
    let bus = EventBus::new(quick_retries(BusConfig::default()));
    let flaky = Arc::new(Flaky::new(3));
    bus.subscribe(flaky.clone()).await;

    bus.publish(event(AggregateId::new(), 1)).await.unwrap();
    bus.settle().await;
    assert_eq!(bus.dead_letters().await.len(), 1);
    assert!(flaky.recorder.versions().await.is_empty());

    let delivered = bus.redeliver_dead_letters().await;

    assert_eq!(delivered, 1);
    assert!(bus.dead_letters().await.is_empty());
    assert_eq!(flaky.recorder.versions().await, vec![1]);
}

#[tokio::test]
async fn dead_letters_of_removed_subscribers_are_kept() {
    let bus = EventBus::new(quick_retries(BusConfig::inline()));
    let handle = bus.subscribe(Arc::new(Broken)).await;
    bus.publish(event(AggregateId::new(), 1)).await.unwrap();
    assert!(bus.unsubscribe(&handle).await);

    assert_eq!(bus.redeliver_dead_letters().await, 0);
    assert_eq!(bus.dead_letters().await.len(), 1);
}

#[tokio::test]
async fn panicking_handler_is_isolated() {
    let bus = EventBus::new(quick_retries(BusConfig::default()));
    let healthy = Arc::new(Recorder::default());
    bus.subscribe(Arc::new(Panicking)).await;
    bus.subscribe(healthy.clone()).await;

    let id = AggregateId::new();
    bus.publish(event(id, 1)).await.unwrap();
    bus.publish(event(id, 2)).await.unwrap();
    bus.settle().await;

    assert_eq!(healthy.versions().await, vec![1, 2]);
    let dead = bus.dead_letters().await;
    assert_eq!(dead.len(), 2);
    assert_eq!(dead[0].error, "handler panicked");
}

#[tokio::test]
async fn inline_mode_delivers_before_publish_returns() {
    let bus = EventBus::new(BusConfig::inline());
    let recorder = Arc::new(Recorder::default());
    bus.subscribe(recorder.clone()).await;

    bus.publish(event(AggregateId::new(), 1)).await.unwrap();

    assert_eq!(recorder.versions().await, vec![1]);
}

#[tokio::test]
async fn inline_failure_does_not_fail_publish() {
    let bus = EventBus::new(quick_retries(BusConfig::inline()));
    bus.subscribe(Arc::new(Broken)).await;

    let result = bus.publish(event(AggregateId::new(), 1)).await;

    assert!(result.is_ok());
    assert_eq!(bus.dead_letters().await.len(), 1);
}

#[tokio::test]
async fn late_subscriber_only_sees_later_events() {
    let bus = EventBus::new(BusConfig::default());
    let early = Arc::new(Recorder::default());
    bus.subscribe(early.clone()).await;

    let id = AggregateId::new();
    bus.publish(event(id, 1)).await.unwrap();

    let late = Arc::new(Recorder::default());
    bus.subscribe(late.clone()).await;
    bus.publish(event(id, 2)).await.unwrap();
    bus.settle().await;

    assert_eq!(early.versions().await, vec![1, 2]);
    assert_eq!(late.versions().await, vec![2]);
}

#[tokio::test]
async fn unsubscribed_handler_stops_receiving() {
    let bus = EventBus::new(BusConfig::default());
    let recorder = Arc::new(Recorder::default());
    let handle = bus.subscribe(recorder.clone()).await;
    assert_eq!(handle.name(), "recorder");

    let id = AggregateId::new();
    bus.publish(event(id, 1)).await.unwrap();
    assert!(bus.unsubscribe(&handle).await);
    bus.publish(event(id, 2)).await.unwrap();
    bus.settle().await;

    // Queued events are drained before unsubscribe returns.
    assert_eq!(recorder.versions().await, vec![1]);
    assert_eq!(bus.subscriber_count().await, 0);
    assert!(!bus.unsubscribe(&handle).await);
}

#[tokio::test]
async fn publish_after_shutdown_is_rejected() {
    let bus = EventBus::new(BusConfig::default());
    let recorder = Arc::new(Recorder::default());
    bus.subscribe(recorder.clone()).await;

    let id = AggregateId::new();
    bus.publish(event(id, 1)).await.unwrap();
    bus.shutdown().await;

    assert_eq!(recorder.versions().await, vec![1]);
    assert!(matches!(
        bus.publish(event(id, 2)).await,
        Err(BusError::Closed)
    ));
}

#[tokio::test]
async fn concurrent_publishers_settle_completely() {
    let bus = EventBus::new(BusConfig::default());
    let recorder = Arc::new(Recorder::default());
    bus.subscribe(recorder.clone()).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let bus = bus.clone();
        tasks.push(tokio::spawn(async move {
            let id = AggregateId::new();
            for v in 1..=25 {
                bus.publish(event(id, v)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    bus.settle().await;

    let seen = recorder.seen.lock().await;
    assert_eq!(seen.len(), 100);
    // Each publisher's own events arrive in the order it sent them.
    let mut by_stream: std::collections::HashMap<AggregateId, Vec<i64>> = Default::default();
    for e in seen.iter() {
        by_stream
            .entry(e.aggregate_id)
            .or_default()
            .push(e.version.as_i64());
    }
    for versions in by_stream.values() {
        assert_eq!(*versions, (1..=25).collect::<Vec<_>>());
    }
}
