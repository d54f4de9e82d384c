use std::time::Duration;

/// Where handlers run relative to [`EventBus::publish`](crate::EventBus::publish).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Every subscriber drains its own queue on a background task. `publish`
    /// returns once the event is queued.
    #[default]
    Background,

    /// Handlers run inside `publish`, one after another. Read models are up
    /// to date when `publish` returns.
    Inline,
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "background" | "async" => Ok(DeliveryMode::Background),
            "inline" | "sync" => Ok(DeliveryMode::Inline),
            other => Err(format!("unknown delivery mode: {other}")),
        }
    }
}

/// Delivery and retry settings for an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub mode: DeliveryMode,

    /// Attempts per event and subscriber before the event is dead-lettered.
    /// Values below 1 are treated as 1.
    pub max_attempts: u32,

    /// Wait before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
}

impl BusConfig {
    pub fn inline() -> Self {
        Self {
            mode: DeliveryMode::Inline,
            ..Self::default()
        }
    }

    pub fn with_retries(mut self, max_attempts: u32, retry_backoff: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_backoff = retry_backoff;
        self
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Background,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}
