//! Write side of the ledger.
//!
//! Aggregates are folds over their event streams. A [`Repository`] rebuilds
//! them and appends what they decide; a [`CommandHandler`] wraps that in
//! validation, conflict retries and a timeout; [`AccountService`] is the
//! account-specific set of command handlers.

pub mod account;
pub mod aggregate;
pub mod command;
pub mod error;
pub mod repository;

pub use account::{
    Account, AccountError, AccountEvent, AccountService, AccountStatus, CloseAccount, Deposit,
    FreezeAccount, Money, OpenAccount, UnfreezeAccount, Withdraw,
};
pub use aggregate::{Aggregate, AggregateRoot, DomainEvent, RecordedEvent};
pub use command::{Command, CommandConfig, CommandHandler, CommandResult, Handles, RetryPolicy};
pub use error::{DomainError, ValidationError};
pub use repository::Repository;
