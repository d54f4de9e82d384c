//! Query side of the account system.
//!
//! - [`Projection`] folds committed events into a read model; wrap one in a
//!   [`ProjectionSubscriber`] to feed it from the event bus
//! - [`ProjectionProcessor`] catches projections up from the store and rebuilds
//!   them from scratch
//! - [`AccountSummaryView`], [`HolderPortfolioView`] and
//!   [`TransactionHistoryView`] are the account read models
//! - [`AccountQueries`] answers the query objects in [`queries`]

pub mod error;
pub mod processor;
pub mod projection;
pub mod queries;
pub mod read_model;
pub mod tracker;
pub mod views;

pub use error::{ProjectionError, QueryError, Result};
pub use processor::{CatchUpReport, ProjectionFailure, ProjectionProcessor};
pub use projection::{Projection, ProjectionPosition, ProjectionSubscriber};
pub use queries::{
    AccountQueries, GetAccountSummary, GetHolderPortfolio, GetTransactionHistory, ListAccounts,
    Query, QueryHandler,
};
pub use read_model::ReadModel;
pub use tracker::VersionTracker;
pub use views::{
    AccountSummary, AccountSummaryView, HolderPortfolio, HolderPortfolioView, PortfolioAccount,
    TransactionEntry, TransactionHistoryView, TransactionKind,
};
