use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use chrono::Utc;
use event_store::EventEnvelope;
use futures_util::FutureExt;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;

use crate::{BusConfig, BusError, DeadLetter, DeliveryMode, EventHandler, Result};

/// Returned by [`EventBus::subscribe`]; identifies one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    name: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

struct Delivery {
    seq: u64,
    event: EventEnvelope,
}

struct Worker {
    queue: mpsc::UnboundedSender<Delivery>,
    /// Sequence number of the last delivery this worker finished.
    processed: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

struct Subscriber {
    id: u64,
    handler: Arc<dyn EventHandler>,
    worker: Option<Worker>,
}

struct Shared {
    config: BusConfig,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

struct Inner {
    shared: Arc<Shared>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    /// Sequence number of the last published event.
    published: AtomicU64,
    /// Held while a background publish stamps its sequence number and fills
    /// the queues, so every queue sees sequence numbers in increasing order.
    sequencer: SyncMutex<()>,
    closed: AtomicBool,
}

/// Fan-out dispatcher from committed events to registered handlers.
///
/// Cloning is cheap and every clone addresses the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared {
                    config,
                    dead_letters: Mutex::new(Vec::new()),
                }),
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
                published: AtomicU64::new(0),
                sequencer: SyncMutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.shared.config
    }

    /// Registers a handler for every event published from now on.
    ///
    /// In background mode this spawns the subscriber's worker task and must
    /// run inside a Tokio runtime.
    pub async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> SubscriptionHandle {
        let mut subscribers = self.inner.subscribers.write().await;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let name = handler.name().to_string();

        let worker = match self.inner.shared.config.mode {
            DeliveryMode::Inline => None,
            DeliveryMode::Background => Some(spawn_worker(
                id,
                Arc::clone(&handler),
                Arc::clone(&self.inner.shared),
                self.inner.published.load(Ordering::SeqCst),
            )),
        };
        subscribers.push(Subscriber {
            id,
            handler,
            worker,
        });

        tracing::debug!(subscription_id = id, subscriber = %name, "subscriber registered");
        SubscriptionHandle { id, name }
    }

    /// Removes a registration. Events already queued for it are still
    /// handled before this returns. Returns false for unknown handles.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = {
            let mut subscribers = self.inner.subscribers.write().await;
            subscribers
                .iter()
                .position(|s| s.id == handle.id)
                .map(|index| subscribers.remove(index))
        };

        match removed {
            Some(subscriber) => {
                if let Some(worker) = subscriber.worker {
                    stop_worker(worker).await;
                }
                tracing::debug!(subscription_id = handle.id, subscriber = %handle.name, "subscriber removed");
                true
            }
            None => false,
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }

    /// Hands one committed event to every registered handler.
    #[tracing::instrument(
        skip(self, event),
        fields(event_type = %event.event_type, aggregate_id = %event.aggregate_id, version = %event.version)
    )]
    pub async fn publish(&self, event: EventEnvelope) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        metrics::counter!("event_bus_events_published_total").increment(1);

        match self.inner.shared.config.mode {
            DeliveryMode::Background => {
                let subscribers = self.inner.subscribers.read().await;
                let _sequenced = self
                    .inner
                    .sequencer
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let seq = self.inner.published.fetch_add(1, Ordering::SeqCst) + 1;

                for subscriber in subscribers.iter() {
                    let Some(worker) = &subscriber.worker else {
                        continue;
                    };
                    let delivery = Delivery {
                        seq,
                        event: event.clone(),
                    };
                    if worker.queue.send(delivery).is_err() {
                        tracing::error!(
                            subscriber = subscriber.handler.name(),
                            "subscriber worker has stopped; event not queued"
                        );
                    }
                }
            }
            DeliveryMode::Inline => {
                let handlers: Vec<(u64, Arc<dyn EventHandler>)> = self
                    .inner
                    .subscribers
                    .read()
                    .await
                    .iter()
                    .map(|s| (s.id, Arc::clone(&s.handler)))
                    .collect();
                self.inner.published.fetch_add(1, Ordering::SeqCst);

                for (id, handler) in handlers {
                    deliver(&self.inner.shared, id, handler.as_ref(), &event).await;
                }
            }
        }

        Ok(())
    }

    /// Publishes events one by one, preserving their order.
    pub async fn publish_all(&self, events: impl IntoIterator<Item = EventEnvelope>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    /// Waits until every current subscriber has finished handling everything
    /// published before this call, successfully or by dead-lettering it.
    pub async fn settle(&self) {
        let target = self.inner.published.load(Ordering::SeqCst);
        let receivers: Vec<watch::Receiver<u64>> = self
            .inner
            .subscribers
            .read()
            .await
            .iter()
            .filter_map(|s| s.worker.as_ref().map(|w| w.processed.clone()))
            .collect();

        for mut processed in receivers {
            // An error means the worker is gone, so there is nothing to wait for.
            let _ = processed.wait_for(|&done| done >= target).await;
        }
    }

    /// Snapshot of the current dead letters.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.shared.dead_letters.lock().await.clone()
    }

    /// Retries every dead letter against its subscriber with the normal retry
    /// budget. Letters that fail again, or whose subscriber is gone, stay in
    /// the queue. Returns how many were delivered.
    pub async fn redeliver_dead_letters(&self) -> usize {
        let letters = std::mem::take(&mut *self.inner.shared.dead_letters.lock().await);
        let mut delivered = 0;

        for letter in letters {
            let handler = self
                .inner
                .subscribers
                .read()
                .await
                .iter()
                .find(|s| s.id == letter.subscription_id)
                .map(|s| Arc::clone(&s.handler));

            match handler {
                Some(handler) => {
                    if deliver(
                        &self.inner.shared,
                        letter.subscription_id,
                        handler.as_ref(),
                        &letter.event,
                    )
                    .await
                    {
                        delivered += 1;
                    }
                }
                None => {
                    tracing::warn!(
                        subscriber = %letter.subscriber,
                        "dead letter kept: subscriber no longer registered"
                    );
                    self.inner.shared.dead_letters.lock().await.push(letter);
                }
            }
        }

        delivered
    }

    /// Stops accepting events and waits for every worker to drain its queue.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let workers: Vec<Worker> = self
            .inner
            .subscribers
            .write()
            .await
            .iter_mut()
            .filter_map(|s| s.worker.take())
            .collect();

        for worker in workers {
            stop_worker(worker).await;
        }
        tracing::info!("event bus shut down");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

fn spawn_worker(
    subscription_id: u64,
    handler: Arc<dyn EventHandler>,
    shared: Arc<Shared>,
    start: u64,
) -> Worker {
    let (queue, mut deliveries) = mpsc::unbounded_channel::<Delivery>();
    let (processed_tx, processed) = watch::channel(start);

    let task = tokio::spawn(async move {
        while let Some(delivery) = deliveries.recv().await {
            deliver(&shared, subscription_id, handler.as_ref(), &delivery.event).await;
            processed_tx.send_replace(delivery.seq);
        }
        tracing::debug!(subscriber = handler.name(), "subscriber worker stopped");
    });

    Worker {
        queue,
        processed,
        task,
    }
}

async fn stop_worker(worker: Worker) {
    let Worker { queue, task, .. } = worker;
    drop(queue);
    if let Err(e) = task.await {
        tracing::error!(error = %e, "subscriber worker ended abnormally");
    }
}

/// Runs one delivery with retries. Returns false if the event was
/// dead-lettered.
async fn deliver(
    shared: &Shared,
    subscription_id: u64,
    handler: &dyn EventHandler,
    event: &EventEnvelope,
) -> bool {
    let attempts = shared.config.attempts();
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
        let error = match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "handler panicked".to_string(),
        };

        metrics::counter!("event_bus_delivery_failures_total").increment(1);
        tracing::warn!(
            subscriber = handler.name(),
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            version = %event.version,
            attempt,
            error = %error,
            "event delivery failed"
        );
        last_error = error;

        if attempt < attempts {
            tokio::time::sleep(shared.config.retry_backoff * attempt).await;
        }
    }

    metrics::counter!("event_bus_dead_letters_total").increment(1);
    tracing::error!(
        subscriber = handler.name(),
        event_id = %event.event_id,
        attempts,
        "event dead-lettered"
    );
    shared.dead_letters.lock().await.push(DeadLetter {
        subscription_id,
        subscriber: handler.name().to_string(),
        event: event.clone(),
        error: last_error,
        attempts,
        failed_at: Utc::now(),
    });
    false
}
