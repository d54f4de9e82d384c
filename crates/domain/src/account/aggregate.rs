//! Account aggregate.

use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{AccountError, AccountEvent, AccountStatus, Money};

/// Folded state of a bank account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    holder: String,
    balance: Money,
    status: AccountStatus,
}

impl Aggregate for Account {
    type Event = AccountEvent;
    type Error = AccountError;

    fn aggregate_type() -> &'static str {
        "Account"
    }

    fn when(mut self, event: &AccountEvent) -> Self {
        match event {
            AccountEvent::AccountOpened {
                holder,
                initial_deposit,
            } => {
                self.holder = holder.clone();
                self.balance = *initial_deposit;
                self.status = AccountStatus::Active;
            }
            // `deposit` and `withdraw` refuse amounts that would overflow.
            AccountEvent::MoneyDeposited { amount } => {
                self.balance = self.balance.saturating_add(*amount)
            }
            AccountEvent::MoneyWithdrawn { amount } => {
                self.balance = self.balance.saturating_sub(*amount)
            }
            AccountEvent::AccountFrozen { .. } => self.status = AccountStatus::Frozen,
            AccountEvent::AccountUnfrozen => self.status = AccountStatus::Active,
            AccountEvent::AccountClosed { .. } => self.status = AccountStatus::Closed,
        }
        self
    }
}

// Queries
impl Account {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }
}

// Decisions. Each checks the current state and returns the events to record,
// or the rule that forbids the command.
impl Account {
    pub fn open(
        &self,
        holder: &str,
        initial_deposit: Money,
    ) -> Result<Vec<AccountEvent>, AccountError> {
        if self.status != AccountStatus::Unopened {
            return Err(AccountError::AlreadyOpened);
        }
        if initial_deposit.is_negative() {
            return Err(AccountError::InvalidAmount {
                amount: initial_deposit,
            });
        }

        Ok(vec![AccountEvent::AccountOpened {
            holder: holder.to_string(),
            initial_deposit,
        }])
    }

    pub fn deposit(&self, amount: Money) -> Result<Vec<AccountEvent>, AccountError> {
        self.ensure_open()?;
        ensure_positive(amount)?;
        if self.balance.checked_add(amount).is_none() {
            return Err(AccountError::BalanceOverflow {
                balance: self.balance,
                amount,
            });
        }

        Ok(vec![AccountEvent::MoneyDeposited { amount }])
    }

    pub fn withdraw(&self, amount: Money) -> Result<Vec<AccountEvent>, AccountError> {
        self.ensure_open()?;
        ensure_positive(amount)?;
        if self.status == AccountStatus::Frozen {
            return Err(AccountError::Frozen);
        }
        if self.balance < amount {
            return Err(AccountError::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }

        Ok(vec![AccountEvent::MoneyWithdrawn { amount }])
    }

    /// No event if the account is already frozen.
    pub fn freeze(&self, reason: &str) -> Result<Vec<AccountEvent>, AccountError> {
        self.ensure_open()?;
        if self.status == AccountStatus::Frozen {
            return Ok(vec![]);
        }

        Ok(vec![AccountEvent::AccountFrozen {
            reason: reason.to_string(),
        }])
    }

    /// No event if the account is already active.
    pub fn unfreeze(&self) -> Result<Vec<AccountEvent>, AccountError> {
        self.ensure_open()?;
        if self.status == AccountStatus::Active {
            return Ok(vec![]);
        }

        Ok(vec![AccountEvent::AccountUnfrozen])
    }

    pub fn close(&self, reason: &str) -> Result<Vec<AccountEvent>, AccountError> {
        self.ensure_open()?;
        if !self.balance.is_zero() {
            return Err(AccountError::NonZeroBalance {
                balance: self.balance,
            });
        }

        Ok(vec![AccountEvent::AccountClosed {
            reason: reason.to_string(),
        }])
    }

    fn ensure_open(&self) -> Result<(), AccountError> {
        match self.status {
            AccountStatus::Unopened => Err(AccountError::NotOpened),
            AccountStatus::Closed => Err(AccountError::Closed),
            AccountStatus::Active | AccountStatus::Frozen => Ok(()),
        }
    }
}

fn ensure_positive(amount: Money) -> Result<(), AccountError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(AccountError::InvalidAmount { amount })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(events: Vec<AccountEvent>) -> Account {
        events.iter().fold(Account::default(), |s, e| s.when(e))
    }

    fn opened(dollars: i64) -> Account {
        let account = Account::default();
        fold(account.open("Jane", Money::from_dollars(dollars)).unwrap())
    }

    fn step(
        account: Account,
        decide: impl FnOnce(&Account) -> Result<Vec<AccountEvent>, AccountError>,
    ) -> Account {
        let events = decide(&account).unwrap();
        events.iter().fold(account, |s, e| s.when(e))
    }

    #[test]
    fn open_sets_holder_and_balance() {
        let account = opened(1000);
        assert_eq!(account.holder(), "Jane");
        assert_eq!(account.balance(), Money::from_dollars(1000));
        assert_eq!(account.status(), AccountStatus::Active);
    }

    #[test]
    fn cannot_open_twice() {
        let account = opened(10);
        assert!(matches!(
            account.open("Jane", Money::ZERO),
            Err(AccountError::AlreadyOpened)
        ));
    }

    #[test]
    fn commands_before_open_are_rejected() {
        let account = Account::default();
        assert!(matches!(
            account.deposit(Money::from_dollars(1)),
            Err(AccountError::NotOpened)
        ));
    }

    #[test]
    fn deposit_and_withdraw_move_balance() {
        let account = opened(1000);
        let account = step(account, |a| a.deposit(Money::from_dollars(500)));
        let account = step(account, |a| a.withdraw(Money::from_dollars(200)));
        assert_eq!(account.balance(), Money::from_dollars(1300));
    }

    #[test]
    fn deposit_that_would_overflow_is_rejected() {
        let account = step(Account::default(), |a| a.open("Jane", Money::from_cents(1)));
        let err = account.deposit(Money::from_cents(i64::MAX)).unwrap_err();
        assert_eq!(
            err,
            AccountError::BalanceOverflow {
                balance: Money::from_cents(1),
                amount: Money::from_cents(i64::MAX),
            }
        );

        let topped_up = step(account, |a| a.deposit(Money::from_cents(i64::MAX - 1)));
        assert_eq!(topped_up.balance(), Money::from_cents(i64::MAX));
    }

    #[test]
    fn overdraft_is_rejected() {
        let account = opened(100);
        let err = account.withdraw(Money::from_dollars(101)).unwrap_err();
        assert_eq!(
            err,
            AccountError::InsufficientFunds {
                balance: Money::from_dollars(100),
                requested: Money::from_dollars(101),
            }
        );
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let account = opened(100);
        assert!(account.deposit(Money::ZERO).is_err());
        assert!(account.withdraw(Money::from_cents(-5)).is_err());
    }

    #[test]
    fn frozen_account_takes_deposits_but_not_withdrawals() {
        let account = step(opened(100), |a| a.freeze("fraud review"));
        assert_eq!(account.status(), AccountStatus::Frozen);

        assert!(account.deposit(Money::from_dollars(5)).is_ok());
        assert!(matches!(
            account.withdraw(Money::from_dollars(5)),
            Err(AccountError::Frozen)
        ));

        let account = step(account, |a| a.unfreeze());
        assert!(account.withdraw(Money::from_dollars(5)).is_ok());
    }

    #[test]
    fn status_no_ops_emit_nothing() {
        let active = opened(1);
        assert!(active.unfreeze().unwrap().is_empty());

        let frozen = step(active, |a| a.freeze("review"));
        assert!(frozen.freeze("again").unwrap().is_empty());
    }

    #[test]
    fn close_requires_zero_balance() {
        let account = opened(50);
        assert!(matches!(
            account.close("moving"),
            Err(AccountError::NonZeroBalance { .. })
        ));

        let account = step(account, |a| a.withdraw(Money::from_dollars(50)));
        let account = step(account, |a| a.close("moving"));
        assert_eq!(account.status(), AccountStatus::Closed);
    }

    #[test]
    fn closed_account_rejects_everything() {
        let account = step(opened(0), |a| a.close("done"));

        assert!(matches!(
            account.deposit(Money::from_dollars(1)),
            Err(AccountError::Closed)
        ));
        assert!(matches!(account.freeze("x"), Err(AccountError::Closed)));
        assert!(matches!(account.unfreeze(), Err(AccountError::Closed)));
        assert!(matches!(account.close("again"), Err(AccountError::Closed)));
    }
}
