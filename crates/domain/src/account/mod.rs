//! Bank account aggregate and its command handlers.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::Account;
pub use commands::{CloseAccount, Deposit, FreezeAccount, OpenAccount, UnfreezeAccount, Withdraw};
pub use events::AccountEvent;
pub use service::AccountService;
pub use state::AccountStatus;
pub use value_objects::Money;

use thiserror::Error;

/// Account rules a command can break.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("account is already open")]
    AlreadyOpened,

    #[error("account has not been opened")]
    NotOpened,

    #[error("account is closed")]
    Closed,

    #[error("account is frozen")]
    Frozen,

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Money, requested: Money },

    #[error("account still holds {balance}")]
    NonZeroBalance { balance: Money },

    #[error("invalid amount {amount}")]
    InvalidAmount { amount: Money },

    #[error("depositing {amount} would overflow balance {balance}")]
    BalanceOverflow { balance: Money, amount: Money },
}
