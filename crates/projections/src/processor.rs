//! Feeds stored events to projections.

use std::sync::Arc;

use event_bus::{EventBus, SubscriptionHandle};
use event_store::{EventId, EventStore};
use futures_util::StreamExt;

use crate::Result;
use crate::projection::{Projection, ProjectionSubscriber};

/// A projection that stopped during catch-up.
#[derive(Debug, Clone)]
pub struct ProjectionFailure {
    pub projection: &'static str,
    pub event_id: EventId,
    pub error: String,
}

/// Outcome of [`ProjectionProcessor::run_catch_up`].
#[derive(Debug, Clone, Default)]
pub struct CatchUpReport {
    /// Events read from the store.
    pub events_read: u64,
    /// One entry per projection that failed. A failed projection gets no
    /// further events in that run; the others carry on.
    pub failures: Vec<ProjectionFailure>,
}

impl CatchUpReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Replays the store into registered projections.
///
/// Catch-up can run at any time, including while the same projections are
/// subscribed to the bus: views skip versions they have already applied.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Arc<dyn Projection>>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
        }
    }

    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Subscribes every registered projection to `bus` for live delivery.
    pub async fn subscribe_all(&self, bus: &EventBus) -> Vec<SubscriptionHandle> {
        let mut handles = Vec::with_capacity(self.projections.len());
        for projection in &self.projections {
            let handler = ProjectionSubscriber::handler(Arc::clone(projection));
            handles.push(bus.subscribe(handler).await);
        }
        handles
    }

    /// Streams every stored event, in commit order, to each projection.
    ///
    /// Store errors abort the run. Projection errors are recorded in the
    /// report and only take the failing projection out of the run.
    #[tracing::instrument(skip(self), fields(projections = self.projections.len()))]
    pub async fn run_catch_up(&self) -> Result<CatchUpReport> {
        let mut stream = self.store.stream_all().await?;
        let mut report = CatchUpReport::default();
        let mut failed = vec![false; self.projections.len()];

        while let Some(result) = stream.next().await {
            let event = result?;
            report.events_read += 1;

            for (projection, failed) in self.projections.iter().zip(failed.iter_mut()) {
                if *failed {
                    continue;
                }
                match projection.handle(&event).await {
                    Ok(()) => {
                        metrics::counter!("projections_events_processed", "projection" => projection.name())
                            .increment(1);
                    }
                    Err(e) => {
                        tracing::error!(
                            projection = projection.name(),
                            event_id = %event.event_id,
                            error = %e,
                            "projection failed during catch-up"
                        );
                        metrics::counter!("projection_failures_total", "projection" => projection.name())
                            .increment(1);
                        report.failures.push(ProjectionFailure {
                            projection: projection.name(),
                            event_id: event.event_id,
                            error: e.to_string(),
                        });
                        *failed = true;
                    }
                }
            }
        }

        tracing::info!(
            events_read = report.events_read,
            failures = report.failures.len(),
            "catch-up complete"
        );
        Ok(report)
    }

    /// Empties every projection and replays the whole store into it.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<CatchUpReport> {
        for projection in &self.projections {
            projection.reset().await?;
        }
        metrics::counter!("projection_rebuilds_total").increment(1);
        self.run_catch_up().await
    }
}
