//! Delivery of committed events to subscribers.
//!
//! The bus is an explicit object: build one per process, register handlers on
//! it and hand it to whoever commits events. Delivery is at least once and
//! every subscriber sees events in the order they were published. A failing
//! handler is retried, then dead-lettered, and never affects other handlers or
//! the write that produced the event.

pub mod bus;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod handler;

pub use bus::{EventBus, SubscriptionHandle};
pub use config::{BusConfig, DeliveryMode};
pub use dead_letter::DeadLetter;
pub use error::{BoxError, BusError, Result};
pub use handler::EventHandler;
