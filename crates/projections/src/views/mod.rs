//! Account read models.

mod account_summary;
mod holder_portfolio;
mod transaction_history;

pub use account_summary::{AccountSummary, AccountSummaryView};
pub use holder_portfolio::{HolderPortfolio, HolderPortfolioView, PortfolioAccount};
pub use transaction_history::{TransactionEntry, TransactionHistoryView, TransactionKind};

use domain::{Account, AccountEvent, Aggregate, RecordedEvent};
use event_store::EventEnvelope;

use crate::Result;

/// Decodes an account event; `None` for other aggregate types.
pub(crate) fn decode_account_event(
    event: &EventEnvelope,
) -> Result<Option<RecordedEvent<AccountEvent>>> {
    if event.aggregate_type != Account::aggregate_type() {
        return Ok(None);
    }
    Ok(Some(RecordedEvent::from_envelope(event)?))
}

#[cfg(test)]
pub(crate) mod test_support {
    use common::AggregateId;
    use domain::{AccountEvent, DomainEvent};
    use event_store::{EventEnvelope, Version};

    pub fn envelope(aggregate_id: AggregateId, version: i64, event: &AccountEvent) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Account")
            .event_type(event.event_type())
            .version(Version::new(version))
            .payload(event)
            .unwrap()
            .build()
            .unwrap()
    }
}
