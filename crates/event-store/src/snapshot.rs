use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{AggregateId, Version};

/// Folded aggregate state captured at a known stream version.
///
/// Loading starts from the snapshot and replays only the events after
/// `version`, which keeps long-lived streams cheap to rebuild. A snapshot is a
/// cache: the stream stays the system of record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Stream version the state was folded up to.
    pub version: Version,

    pub taken_at: DateTime<Utc>,
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Captures serializable aggregate state.
    pub fn capture<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            taken_at: Utc::now(),
            state: serde_json::to_value(state)?,
        })
    }

    /// Decodes the captured state.
    pub fn restore<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state.clone())
    }
}
