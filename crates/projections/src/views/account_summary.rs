//! Account summary read model: current state of every account.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{AccountEvent, AccountStatus, Money, RecordedEvent};
use event_store::{EventEnvelope, Version};
use serde::Serialize;
use tokio::sync::RwLock;

use super::decode_account_event;
use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;
use crate::tracker::VersionTracker;

/// One row per account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub account_id: AggregateId,
    pub holder: String,
    pub balance: Money,
    pub status: AccountStatus,
    pub version: Version,
    pub opened_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Default)]
struct AccountSummaryState {
    accounts: HashMap<AggregateId, AccountSummary>,
    tracker: VersionTracker<RecordedEvent<AccountEvent>>,
    position: ProjectionPosition,
}

impl AccountSummaryState {
    fn apply(&mut self, recorded: &RecordedEvent<AccountEvent>) {
        let id = recorded.aggregate_id;

        if let AccountEvent::AccountOpened {
            holder,
            initial_deposit,
        } = &recorded.event
        {
            self.accounts.insert(
                id,
                AccountSummary {
                    account_id: id,
                    holder: holder.clone(),
                    balance: *initial_deposit,
                    status: AccountStatus::Active,
                    version: recorded.version,
                    opened_at: recorded.timestamp,
                    last_activity: recorded.timestamp,
                },
            );
            return;
        }

        let Some(summary) = self.accounts.get_mut(&id) else {
            tracing::warn!(account_id = %id, version = %recorded.version, "event for unknown account");
            return;
        };
        match &recorded.event {
            AccountEvent::AccountOpened { .. } => {}
            AccountEvent::MoneyDeposited { amount } => {
                summary.balance = summary.balance.saturating_add(*amount)
            }
            AccountEvent::MoneyWithdrawn { amount } => {
                summary.balance = summary.balance.saturating_sub(*amount)
            }
            AccountEvent::AccountFrozen { .. } => summary.status = AccountStatus::Frozen,
            AccountEvent::AccountUnfrozen => summary.status = AccountStatus::Active,
            AccountEvent::AccountClosed { .. } => summary.status = AccountStatus::Closed,
        }
        summary.version = recorded.version;
        summary.last_activity = recorded.timestamp;
    }
}

/// Current holder, balance and status per account.
#[derive(Clone, Default)]
pub struct AccountSummaryView {
    state: Arc<RwLock<AccountSummaryState>>,
}

impl AccountSummaryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, account_id: AggregateId) -> Option<AccountSummary> {
        self.state.read().await.accounts.get(&account_id).cloned()
    }

    /// All accounts, oldest first.
    pub async fn list(&self) -> Vec<AccountSummary> {
        let state = self.state.read().await;
        let mut accounts: Vec<_> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| {
            a.opened_at
                .cmp(&b.opened_at)
                .then(a.account_id.cmp(&b.account_id))
        });
        accounts
    }

    pub async fn list_by_status(&self, status: AccountStatus) -> Vec<AccountSummary> {
        let mut accounts = self.list().await;
        accounts.retain(|a| a.status == status);
        accounts
    }

    /// The whole view in a deterministic order, for comparing two builds.
    pub async fn snapshot(&self) -> BTreeMap<AggregateId, AccountSummary> {
        let state = self.state.read().await;
        state
            .accounts
            .iter()
            .map(|(id, summary)| (*id, summary.clone()))
            .collect()
    }
}

#[async_trait]
impl Projection for AccountSummaryView {
    fn name(&self) -> &'static str {
        "AccountSummaryView"
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
        *self.state.write().await = AccountSummaryState::default();
        Ok(())
    }
}

#[async_trait]
impl ReadModel for AccountSummaryView {
    fn name(&self) -> &'static str {
        "AccountSummaryView"
    }

    async fn count(&self) -> usize {
        self.state.read().await.accounts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::test_support::envelope;

    fn opened(holder: &str, dollars: i64) -> AccountEvent {
        AccountEvent::AccountOpened {
            holder: holder.to_string(),
            initial_deposit: Money::from_dollars(dollars),
        }
    }

    #[tokio::test]
    async fn folds_balance_and_status() {
        let view = AccountSummaryView::new();
        let id = AggregateId::new();
        let events = [
            opened("Jane", 1000),
            AccountEvent::MoneyDeposited {
                amount: Money::from_dollars(500),
            },
            AccountEvent::MoneyWithdrawn {
                amount: Money::from_dollars(200),
            },
            AccountEvent::AccountFrozen {
                reason: "review".to_string(),
            },
        ];
        for (i, event) in events.iter().enumerate() {
            view.handle(&envelope(id, i as i64 + 1, event)).await.unwrap();
        }

        let summary = view.get(id).await.unwrap();
        assert_eq!(summary.holder, "Jane");
        assert_eq!(summary.balance, Money::from_dollars(1300));
        assert_eq!(summary.status, AccountStatus::Frozen);
        assert_eq!(summary.version, Version::new(4));
        assert_eq!(view.position().await.events_processed, 4);
        assert_eq!(ReadModel::count(&view).await, 1);
    }

    #[tokio::test]
    async fn count_waits_for_an_in_flight_write() {
        let view = AccountSummaryView::new();
        view.handle(&envelope(AggregateId::new(), 1, &opened("Jane", 1)))
            .await
            .unwrap();

        let writer = view.state.write().await;
        let counting = tokio::spawn({
            let view = view.clone();
            async move { ReadModel::count(&view).await }
        });
        tokio::task::yield_now().await;
        assert!(!counting.is_finished());

        drop(writer);
        assert_eq!(counting.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn balance_saturates_instead_of_wrapping() {
        let view = AccountSummaryView::new();
        let id = AggregateId::new();
        let open = AccountEvent::AccountOpened {
            holder: "Jane".to_string(),
            initial_deposit: Money::from_cents(i64::MAX),
        };
        view.handle(&envelope(id, 1, &open)).await.unwrap();
        view.handle(&envelope(
            id,
            2,
            &AccountEvent::MoneyDeposited {
                amount: Money::from_cents(1),
            },
        ))
        .await
        .unwrap();

        assert_eq!(view.get(id).await.unwrap().balance, Money::from_cents(i64::MAX));
    }

    #[tokio::test]
    async fn redelivery_does_not_double_count() {
        let view = AccountSummaryView::new();
        let id = AggregateId::new();
        let open = envelope(id, 1, &opened("Jane", 10));
        let deposit = envelope(
            id,
            2,
            &AccountEvent::MoneyDeposited {
                amount: Money::from_dollars(5),
            },
        );

        for event in [&open, &deposit, &deposit, &open] {
            view.handle(event).await.unwrap();
        }

        assert_eq!(view.get(id).await.unwrap().balance, Money::from_dollars(15));
        assert_eq!(view.position().await.events_processed, 2);
    }

    #[tokio::test]
    async fn ignores_other_aggregate_types() {
        let view = AccountSummaryView::new();
        let mut event = envelope(AggregateId::new(), 1, &opened("Jane", 1));
        event.aggregate_type = "Order".to_string();
        event.payload = serde_json::json!({"unrelated": true});

        view.handle(&event).await.unwrap();

        assert!(view.list().await.is_empty());
    }

    #[tokio::test]
    async fn undecodable_payload_is_an_error() {
        let view = AccountSummaryView::new();
        let mut event = envelope(AggregateId::new(), 1, &opened("Jane", 1));
        event.payload = serde_json::json!({"type": "Nope"});

        assert!(matches!(
            view.handle(&event).await,
            Err(crate::ProjectionError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn list_by_status_filters() {
        let view = AccountSummaryView::new();
        let (a, b) = (AggregateId::new(), AggregateId::new());
        view.handle(&envelope(a, 1, &opened("Jane", 1))).await.unwrap();
        view.handle(&envelope(b, 1, &opened("John", 0))).await.unwrap();
        view.handle(&envelope(
            b,
            2,
            &AccountEvent::AccountClosed {
                reason: "done".to_string(),
            },
        ))
        .await
        .unwrap();

        let closed = view.list_by_status(AccountStatus::Closed).await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].account_id, b);
        assert_eq!(view.list().await.len(), 2);
    }

    #[tokio::test]
    async fn reset_empties_the_view() {
        let view = AccountSummaryView::new();
        let id = AggregateId::new();
        view.handle(&envelope(id, 1, &opened("Jane", 1))).await.unwrap();

        view.reset().await.unwrap();

        assert!(view.get(id).await.is_none());
        assert_eq!(view.position().await, ProjectionPosition::zero());
        view.handle(&envelope(id, 1, &opened("Jane", 1))).await.unwrap();
        assert!(view.get(id).await.is_some());
    }
}
