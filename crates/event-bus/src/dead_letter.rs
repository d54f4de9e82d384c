use chrono::{DateTime, Utc};
use event_store::EventEnvelope;

/// An event a subscriber could not handle within its retry budget.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Id of the subscription the delivery was meant for.
    pub subscription_id: u64,
    pub subscriber: String,
    pub event: EventEnvelope,
    /// Message of the last failure.
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}
