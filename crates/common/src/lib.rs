//! Identifiers shared by every crate in the workspace.

mod id;

pub use id::{AggregateId, ParseIdError};
