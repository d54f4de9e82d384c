//! Holder portfolio read model: every account a holder owns, with totals.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{AccountEvent, AccountStatus, Money, RecordedEvent};
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use super::decode_account_event;
use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;
use crate::tracker::VersionTracker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortfolioAccount {
    pub balance: Money,
    pub status: AccountStatus,
}

/// All accounts of one holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HolderPortfolio {
    pub holder: String,
    pub accounts: BTreeMap<AggregateId, PortfolioAccount>,
    /// Sum of every account balance, closed accounts included.
    pub total_balance: Money,
    pub open_accounts: usize,
}

impl HolderPortfolio {
    fn new(holder: &str) -> Self {
        Self {
            holder: holder.to_string(),
            accounts: BTreeMap::new(),
            total_balance: Money::ZERO,
            open_accounts: 0,
        }
    }

    fn recompute(&mut self) {
        self.total_balance = self.accounts.values().map(|a| a.balance).sum();
        self.open_accounts = self
            .accounts
            .values()
            .filter(|a| a.status.is_open())
            .count();
    }
}

#[derive(Default)]
struct HolderPortfolioState {
    portfolios: HashMap<String, HolderPortfolio>,
    /// account id -> holder, learned from `AccountOpened`.
    holders: HashMap<AggregateId, String>,
    tracker: VersionTracker<RecordedEvent<AccountEvent>>,
    position: ProjectionPosition,
}

impl HolderPortfolioState {
    fn apply(&mut self, recorded: &RecordedEvent<AccountEvent>) {
        let id = recorded.aggregate_id;

        if let AccountEvent::AccountOpened {
            holder,
            initial_deposit,
        } = &recorded.event
        {
            self.holders.insert(id, holder.clone());
            let portfolio = self
                .portfolios
                .entry(holder.clone())
                .or_insert_with(|| HolderPortfolio::new(holder));
            portfolio.accounts.insert(
                id,
                PortfolioAccount {
                    balance: *initial_deposit,
                    status: AccountStatus::Active,
                },
            );
            portfolio.recompute();
            return;
        }

        let Some(portfolio) = self
            .holders
            .get(&id)
            .and_then(|holder| self.portfolios.get_mut(holder))
        else {
            tracing::warn!(account_id = %id, version = %recorded.version, "event for unknown account");
            return;
        };
        let Some(account) = portfolio.accounts.get_mut(&id) else {
            return;
        };
        match &recorded.event {
            AccountEvent::AccountOpened { .. } => {}
            AccountEvent::MoneyDeposited { amount } => {
                account.balance = account.balance.saturating_add(*amount)
            }
            AccountEvent::MoneyWithdrawn { amount } => {
                account.balance = account.balance.saturating_sub(*amount)
            }
            AccountEvent::AccountFrozen { .. } => account.status = AccountStatus::Frozen,
            AccountEvent::AccountUnfrozen => account.status = AccountStatus::Active,
            AccountEvent::AccountClosed { .. } => account.status = AccountStatus::Closed,
        }
        portfolio.recompute();
    }
}

/// Accounts and totals grouped by holder name.
#[derive(Clone, Default)]
pub struct HolderPortfolioView {
    state: Arc<RwLock<HolderPortfolioState>>,
}

impl HolderPortfolioView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, holder: &str) -> Option<HolderPortfolio> {
        self.state.read().await.portfolios.get(holder).cloned()
    }

    /// Holder names in alphabetical order.
    pub async fn holders(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut holders: Vec<_> = state.portfolios.keys().cloned().collect();
        holders.sort();
        holders
    }

    pub async fn snapshot(&self) -> BTreeMap<String, HolderPortfolio> {
        let state = self.state.read().await;
        state
            .portfolios
            .iter()
            .map(|(holder, portfolio)| (holder.clone(), portfolio.clone()))
            .collect()
    }
}

#[async_trait]
impl Projection for HolderPortfolioView {
    fn name(&self) -> &'static str {
        "HolderPortfolioView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let Some(recorded) = decode_account_event(event)? else {
            return Ok(());
        };

        let mut state = self.state.write().await;
        let ready = state
            .tracker
            .admit(recorded.aggregate_id, recorded.version, recorded);
        for recorded in &ready {
            state.apply(recorded);
            state.position = state.position.advance();
        }
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = HolderPortfolioState::default();
        Ok(())
    }
}

#[async_trait]
impl ReadModel for HolderPortfolioView {
    fn name(&self) -> &'static str {
        "HolderPortfolioView"
    }

    async fn count(&self) -> usize {
        self.state.read().await.portfolios.len()
    }
}
