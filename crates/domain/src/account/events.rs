//! Account domain events.

use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::Money;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AccountEvent {
    AccountOpened { holder: String, initial_deposit: Money },
    MoneyDeposited { amount: Money },
    MoneyWithdrawn { amount: Money },
    AccountFrozen { reason: String },
    AccountUnfrozen,
    AccountClosed { reason: String },
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountOpened { .. } => "AccountOpened",
            AccountEvent::MoneyDeposited { .. } => "MoneyDeposited",
            AccountEvent::MoneyWithdrawn { .. } => "MoneyWithdrawn",
            AccountEvent::AccountFrozen { .. } => "AccountFrozen",
            AccountEvent::AccountUnfrozen => "AccountUnfrozen",
            AccountEvent::AccountClosed { .. } => "AccountClosed",
        }
    }
}
