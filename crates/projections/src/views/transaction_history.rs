//! Transaction history read model: an account statement with running balance.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{AccountEvent, Money, RecordedEvent};
use event_store::{EventEnvelope, Version};
use serde::Serialize;
use tokio::sync::RwLock;

use super::decode_account_event;
use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;
use crate::tracker::VersionTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransactionKind {
    Opened,
    Deposit,
    Withdrawal,
    Frozen,
    Unfrozen,
    Closed,
}

/// One line of an account statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionEntry {
    pub version: Version,
    pub kind: TransactionKind,
    /// Money moved by the event; zero for status changes.
    pub amount: Money,
    pub balance_after: Money,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct TransactionHistoryState {
    entries: HashMap<AggregateId, Vec<TransactionEntry>>,
    tracker: VersionTracker<RecordedEvent<AccountEvent>>,
    position: ProjectionPosition,
}

impl TransactionHistoryState {
    fn apply(&mut self, recorded: &RecordedEvent<AccountEvent>) {
        let entries = self.entries.entry(recorded.aggregate_id).or_default();
        let balance = entries
            .last()
            .map(|e| e.balance_after)
            .unwrap_or(Money::ZERO);

        let (kind, amount, balance_after, reason) = match &recorded.event {
            AccountEvent::AccountOpened {
                initial_deposit, ..
            } => (
                TransactionKind::Opened,
                *initial_deposit,
                *initial_deposit,
                None,
            ),
            AccountEvent::MoneyDeposited { amount } => {
                let after = balance.saturating_add(*amount);
                (TransactionKind::Deposit, *amount, after, None)
            }
            AccountEvent::MoneyWithdrawn { amount } => {
                let after = balance.saturating_sub(*amount);
                (TransactionKind::Withdrawal, *amount, after, None)
            }
            AccountEvent::AccountFrozen { reason } => (
                TransactionKind::Frozen,
                Money::ZERO,
                balance,
                Some(reason.clone()),
            ),
            AccountEvent::AccountUnfrozen => {
                (TransactionKind::Unfrozen, Money::ZERO, balance, None)
            }
            AccountEvent::AccountClosed { reason } => (
                TransactionKind::Closed,
                Money::ZERO,
                balance,
                Some(reason.clone()),
            ),
        };

        entries.push(TransactionEntry {
            version: recorded.version,
            kind,
            amount,
            balance_after,
            reason,
            recorded_at: recorded.timestamp,
        });
    }
}

/// Every event of every account as a statement line.
#[derive(Clone, Default)]
pub struct TransactionHistoryView {
    state: Arc<RwLock<TransactionHistoryState>>,
}

impl TransactionHistoryView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest entries first, at most `limit` of them. `None` if the account
    /// has no history.
    pub async fn history(
        &self,
        account_id: AggregateId,
        limit: Option<usize>,
    ) -> Option<Vec<TransactionEntry>> {
        let state = self.state.read().await;
        let entries = state.entries.get(&account_id)?;
        let take = limit.unwrap_or(entries.len());
        Some(entries.iter().rev().take(take).cloned().collect())
    }

    pub async fn snapshot(&self) -> BTreeMap<AggregateId, Vec<TransactionEntry>> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .map(|(id, entries)| (*id, entries.clone()))
            .collect()
    }
}

#[async_trait]
impl Projection for TransactionHistoryView {
    fn name(&self) -> &'static str {
        "TransactionHistoryView"
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
        *self.state.write().await = TransactionHistoryState::default();
        Ok(())
    }
}

#[async_trait]
impl ReadModel for TransactionHistoryView {
    fn name(&self) -> &'static str {
        "TransactionHistoryView"
    }

    async fn count(&self) -> usize {
        self.state
            .read()
            .await
            .entries
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::test_support::envelope;

    fn statement(id: AggregateId) -> Vec<EventEnvelope> {
        let events = [
            AccountEvent::AccountOpened {
                holder: "Jane".to_string(),
                initial_deposit: Money::from_dollars(1000),
            },
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
        events
            .iter()
            .enumerate()
            .map(|(i, e)| envelope(id, i as i64 + 1, e))
            .collect()
    }

    #[tokio::test]
    async fn running_balance_follows_each_entry() {
        let view = TransactionHistoryView::new();
        let id = AggregateId::new();
        for event in statement(id) {
            view.handle(&event).await.unwrap();
        }

        let history = view.history(id, None).await.unwrap();
        let balances: Vec<_> = history.iter().rev().map(|e| e.balance_after).collect();
        assert_eq!(
            balances,
            vec![
                Money::from_dollars(1000),
                Money::from_dollars(1500),
                Money::from_dollars(1300),
                Money::from_dollars(1300),
            ]
        );
        assert_eq!(history[0].kind, TransactionKind::Frozen);
        assert_eq!(history[0].reason.as_deref(), Some("review"));
    }

    #[tokio::test]
    async fn limit_returns_most_recent() {
        let view = TransactionHistoryView::new();
        let id = AggregateId::new();
        for event in statement(id) {
            view.handle(&event).await.unwrap();
        }

        let recent = view.history(id, Some(2)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].version, Version::new(4));
        assert_eq!(recent[1].version, Version::new(3));
        assert!(view.history(AggregateId::new(), None).await.is_none());
    }

    #[tokio::test]
    async fn out_of_order_delivery_is_applied_in_version_order() {
        let view = TransactionHistoryView::new();
        let id = AggregateId::new();
        let events = statement(id);

        for i in [0, 2, 3, 2, 1] {
            view.handle(&events[i]).await.unwrap();
        }

        let history = view.history(id, None).await.unwrap();
        let versions: Vec<_> = history.iter().rev().map(|e| e.version.as_i64()).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
        assert_eq!(history[0].balance_after, Money::from_dollars(1300));
        assert_eq!(ReadModel::count(&view).await, 4);
    }
}
