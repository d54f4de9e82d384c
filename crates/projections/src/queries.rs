//! Query objects and their handlers.
//!
//! Handlers read the views directly and never touch the event store.

use async_trait::async_trait;
use common::AggregateId;
use domain::AccountStatus;

use crate::error::QueryError;
use crate::views::{
    AccountSummary, AccountSummaryView, HolderPortfolio, HolderPortfolioView, TransactionEntry,
    TransactionHistoryView,
};

/// A read request with a fixed result shape.
pub trait Query: std::fmt::Debug + Send + Sync + 'static {
    type Output: Send;
}

/// One handler per query type.
#[async_trait]
pub trait QueryHandler<Q: Query> {
    async fn handle(&self, query: Q) -> Result<Q::Output, QueryError>;
}

#[derive(Debug, Clone)]
pub struct GetAccountSummary {
    pub account_id: AggregateId,
}

impl Query for GetAccountSummary {
    type Output = AccountSummary;
}

/// All accounts, optionally only those in one status.
#[derive(Debug, Clone, Default)]
pub struct ListAccounts {
    pub status: Option<AccountStatus>,
}

impl Query for ListAccounts {
    type Output = Vec<AccountSummary>;
}

#[derive(Debug, Clone)]
pub struct GetHolderPortfolio {
    pub holder: String,
}

impl Query for GetHolderPortfolio {
    type Output = HolderPortfolio;
}

/// Newest entries first; `limit` caps how many.
#[derive(Debug, Clone)]
pub struct GetTransactionHistory {
    pub account_id: AggregateId,
    pub limit: Option<usize>,
}

impl Query for GetTransactionHistory {
    type Output = Vec<TransactionEntry>;
}

/// Answers account queries from the account read models.
#[derive(Clone, Default)]
pub struct AccountQueries {
    summaries: AccountSummaryView,
    portfolios: HolderPortfolioView,
    history: TransactionHistoryView,
}

impl AccountQueries {
    pub fn new(
        summaries: AccountSummaryView,
        portfolios: HolderPortfolioView,
        history: TransactionHistoryView,
    ) -> Self {
        Self {
            summaries,
            portfolios,
            history,
        }
    }
}

#[async_trait]
impl QueryHandler<GetAccountSummary> for AccountQueries {
    #[tracing::instrument(skip(self))]
    async fn handle(&self, query: GetAccountSummary) -> Result<AccountSummary, QueryError> {
        self.summaries
            .get(query.account_id)
            .await
            .ok_or_else(|| QueryError::NotFound {
                entity: "account",
                key: query.account_id.to_string(),
            })
    }
}

#[async_trait]
impl QueryHandler<ListAccounts> for AccountQueries {
    async fn handle(&self, query: ListAccounts) -> Result<Vec<AccountSummary>, QueryError> {
        Ok(match query.status {
            Some(status) => self.summaries.list_by_status(status).await,
            None => self.summaries.list().await,
        })
    }
}

#[async_trait]
impl QueryHandler<GetHolderPortfolio> for AccountQueries {
    #[tracing::instrument(skip(self))]
    async fn handle(&self, query: GetHolderPortfolio) -> Result<HolderPortfolio, QueryError> {
        match self.portfolios.get(&query.holder).await {
            Some(portfolio) => Ok(portfolio),
            None => Err(QueryError::NotFound {
                entity: "holder",
                key: query.holder,
            }),
        }
    }
}

#[async_trait]
impl QueryHandler<GetTransactionHistory> for AccountQueries {
    #[tracing::instrument(skip(self))]
    async fn handle(
        &self,
        query: GetTransactionHistory,
    ) -> Result<Vec<TransactionEntry>, QueryError> {
        self.history
            .history(query.account_id, query.limit)
            .await
            .ok_or_else(|| QueryError::NotFound {
                entity: "account",
                key: query.account_id.to_string(),
            })
    }
}
