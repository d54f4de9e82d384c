use thiserror::Error;

/// Error type returned by subscriber handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the bus itself. Handler failures never surface here.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus was shut down and accepts no more events.
    #[error("event bus is shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BusError>;
