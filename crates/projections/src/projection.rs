//! Core projection trait, position tracking and the bus adapter.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{BoxError, EventHandler};
use event_store::EventEnvelope;

use crate::Result;

/// How many events a projection has folded into its read model.
///
/// Duplicates and events for other aggregate types are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    pub events_processed: u64,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self {
            events_processed: 0,
        }
    }

    pub fn advance(&self) -> Self {
        Self {
            events_processed: self.events_processed + 1,
        }
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "position({})", self.events_processed)
    }
}

/// A projection that folds committed events into a read model.
///
/// `handle` sees every event in the system and may see any of them more than
/// once, so implementations ignore kinds they do not care about and skip
/// events they have already applied.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    /// Empties the read model ahead of a rebuild.
    async fn reset(&self) -> Result<()>;
}

#[async_trait]
impl<P: Projection + ?Sized> Projection for Arc<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        (**self).handle(event).await
    }

    async fn position(&self) -> ProjectionPosition {
        (**self).position().await
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }
}

/// Feeds a projection from the event bus.
///
/// Errors go back to the bus, which retries and eventually dead-letters the
/// event for this projection alone.
pub struct ProjectionSubscriber<P> {
    projection: P,
}

impl<P: Projection + 'static> ProjectionSubscriber<P> {
    pub fn new(projection: P) -> Self {
        Self { projection }
    }

    /// Wraps `projection` ready for [`event_bus::EventBus::subscribe`].
    pub fn handler(projection: P) -> Arc<dyn EventHandler> {
        Arc::new(Self::new(projection))
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }
}

#[async_trait]
impl<P: Projection + 'static> EventHandler for ProjectionSubscriber<P> {
    fn name(&self) -> &str {
        self.projection.name()
    }

    async fn handle(&self, event: &EventEnvelope) -> std::result::Result<(), BoxError> {
        self.projection.handle(event).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProjectionError;
    use common::AggregateId;
    use event_store::Version;

    struct Failing;

    #[async_trait]
    impl Projection for Failing {
        fn name(&self) -> &'static str {
            "Failing"
        }

        async fn handle(&self, _event: &EventEnvelope) -> Result<()> {
            Err(ProjectionError::Projection("read model offline".to_string()))
        }

        async fn position(&self) -> ProjectionPosition {
            ProjectionPosition::zero()
        }

        async fn reset(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn position_advances() {
        let pos = ProjectionPosition::zero().advance().advance();
        assert_eq!(pos.events_processed, 2);
        assert_eq!(pos.to_string(), "position(2)");
    }

    #[tokio::test]
    async fn subscriber_reports_projection_errors_to_the_bus() {
        let handler = ProjectionSubscriber::handler(Failing);
        let event = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("Account")
            .event_type("MoneyDeposited")
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap();

        assert_eq!(handler.name(), "Failing");
        let err = handler.handle(&event).await.unwrap_err();
        assert!(err.to_string().contains("read model offline"));
    }
}
