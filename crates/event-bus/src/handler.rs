use async_trait::async_trait;
use event_store::EventEnvelope;

use crate::BoxError;

/// A subscriber that reacts to committed events.
///
/// Handlers see every published event, so they must ignore kinds they do not
/// care about and tolerate seeing the same event more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name used in logs and dead letters.
    fn name(&self) -> &str;

    async fn handle(&self, event: &EventEnvelope) -> Result<(), BoxError>;
}
