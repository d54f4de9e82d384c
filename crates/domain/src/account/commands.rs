//! Account commands.

use common::AggregateId;

use crate::command::Command;
use crate::error::ValidationError;

use super::{Account, Money};

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required { field });
    }
    Ok(())
}

fn require_positive(field: &'static str, amount: Money) -> Result<(), ValidationError> {
    if !amount.is_positive() {
        return Err(ValidationError::NotPositive {
            field,
            value: amount.cents(),
        });
    }
    Ok(())
}

/// Opens a new account. The only command that may target an empty stream.
#[derive(Debug, Clone)]
pub struct OpenAccount {
    pub account_id: AggregateId,
    pub holder: String,
    pub initial_deposit: Money,
}

impl OpenAccount {
    pub fn new(
        account_id: AggregateId,
        holder: impl Into<String>,
        initial_deposit: Money,
    ) -> Self {
        Self {
            account_id,
            holder: holder.into(),
            initial_deposit,
        }
    }

    /// Opens under a freshly generated id.
    pub fn for_holder(holder: impl Into<String>, initial_deposit: Money) -> Self {
        Self::new(AggregateId::new(), holder, initial_deposit)
    }
}

impl Command for OpenAccount {
    type Aggregate = Account;

    fn name(&self) -> &'static str {
        "open_account"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("holder", &self.holder)?;
        if self.initial_deposit.is_negative() {
            return Err(ValidationError::Negative {
                field: "initial_deposit",
                value: self.initial_deposit.cents(),
            });
        }
        Ok(())
    }

    fn creates_aggregate(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct Deposit {
    pub account_id: AggregateId,
    pub amount: Money,
}

impl Deposit {
    pub fn new(account_id: AggregateId, amount: Money) -> Self {
        Self { account_id, amount }
    }
}

impl Command for Deposit {
    type Aggregate = Account;

    fn name(&self) -> &'static str {
        "deposit"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_positive("amount", self.amount)
    }
}

#[derive(Debug, Clone)]
pub struct Withdraw {
    pub account_id: AggregateId,
    pub amount: Money,
}

impl Withdraw {
    pub fn new(account_id: AggregateId, amount: Money) -> Self {
        Self { account_id, amount }
    }
}

impl Command for Withdraw {
    type Aggregate = Account;

    fn name(&self) -> &'static str {
        "withdraw"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_positive("amount", self.amount)
    }
}

#[derive(Debug, Clone)]
pub struct FreezeAccount {
    pub account_id: AggregateId,
    pub reason: String,
}

impl FreezeAccount {
    pub fn new(account_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            account_id,
            reason: reason.into(),
        }
    }
}

impl Command for FreezeAccount {
    type Aggregate = Account;

    fn name(&self) -> &'static str {
        "freeze_account"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("reason", &self.reason)
    }
}

#[derive(Debug, Clone)]
pub struct UnfreezeAccount {
    pub account_id: AggregateId,
}

impl UnfreezeAccount {
    pub fn new(account_id: AggregateId) -> Self {
        Self { account_id }
    }
}

impl Command for UnfreezeAccount {
    type Aggregate = Account;

    fn name(&self) -> &'static str {
        "unfreeze_account"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }
}

#[derive(Debug, Clone)]
pub struct CloseAccount {
    pub account_id: AggregateId,
    pub reason: String,
}

impl CloseAccount {
    pub fn new(account_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            account_id,
            reason: reason.into(),
        }
    }
}

impl Command for CloseAccount {
    type Aggregate = Account;

    fn name(&self) -> &'static str {
        "close_account"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("reason", &self.reason)
    }
}
