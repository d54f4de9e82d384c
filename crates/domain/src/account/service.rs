//! Command handlers for accounts.

use async_trait::async_trait;
use common::AggregateId;
use event_store::EventStore;

use crate::aggregate::AggregateRoot;
use crate::command::{CommandConfig, CommandHandler, CommandResult, Handles};
use crate::error::DomainError;
use crate::repository::Repository;

use super::{
    Account, CloseAccount, Deposit, FreezeAccount, OpenAccount, UnfreezeAccount, Withdraw,
};

/// Write-side entry point for accounts: one [`Handles`] implementation per
/// account command.
pub struct AccountService<S> {
    handler: CommandHandler<S, Account>,
}

impl<S: EventStore> AccountService<S> {
    pub fn new(repository: Repository<S, Account>, config: CommandConfig) -> Self {
        Self {
            handler: CommandHandler::new(repository, config),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Account> {
        &self.handler
    }

    /// Replays an account from its stream. Write-side use only; reads go
    /// through the projections.
    pub async fn load(
        &self,
        account_id: AggregateId,
    ) -> Result<AggregateRoot<Account>, DomainError> {
        self.handler.repository().get_by_id(account_id).await
    }
}

#[async_trait]
impl<S: EventStore> Handles<OpenAccount> for AccountService<S> {
    #[tracing::instrument(skip(self, command), fields(account_id = %command.account_id))]
    async fn handle(&self, command: OpenAccount) -> Result<CommandResult<Account>, DomainError> {
        self.handler
            .execute(&command, |account| {
                account.open(&command.holder, command.initial_deposit)
            })
            .await
    }
}

#[async_trait]
impl<S: EventStore> Handles<Deposit> for AccountService<S> {
    #[tracing::instrument(skip(self, command), fields(account_id = %command.account_id))]
    async fn handle(&self, command: Deposit) -> Result<CommandResult<Account>, DomainError> {
        self.handler
            .execute(&command, |account| account.deposit(command.amount))
            .await
    }
}

#[async_trait]
impl<S: EventStore> Handles<Withdraw> for AccountService<S> {
    #[tracing::instrument(skip(self, command), fields(account_id = %command.account_id))]
    async fn handle(&self, command: Withdraw) -> Result<CommandResult<Account>, DomainError> {
        self.handler
            .execute(&command, |account| account.withdraw(command.amount))
            .await
    }
}

#[async_trait]
impl<S: EventStore> Handles<FreezeAccount> for AccountService<S> {
    #[tracing::instrument(skip(self, command), fields(account_id = %command.account_id))]
    async fn handle(&self, command: FreezeAccount) -> Result<CommandResult<Account>, DomainError> {
        self.handler
            .execute(&command, |account| account.freeze(&command.reason))
            .await
    }
}

#[async_trait]
impl<S: EventStore> Handles<UnfreezeAccount> for AccountService<S> {
    #[tracing::instrument(skip(self, command), fields(account_id = %command.account_id))]
    async fn handle(
        &self,
        command: UnfreezeAccount,
    ) -> Result<CommandResult<Account>, DomainError> {
        self.handler
            .execute(&command, |account| account.unfreeze())
            .await
    }
}

#[async_trait]
impl<S: EventStore> Handles<CloseAccount> for AccountService<S> {
    #[tracing::instrument(skip(self, command), fields(account_id = %command.account_id))]
    async fn handle(&self, command: CloseAccount) -> Result<CommandResult<Account>, DomainError> {
        self.handler
            .execute(&command, |account| account.close(&command.reason))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountError, AccountEvent, AccountStatus, Money};
    use crate::command::RetryPolicy;
    use event_bus::{BusConfig, EventBus};
    use event_store::{InMemoryEventStore, Version};

    fn service() -> AccountService<InMemoryEventStore> {
        let repository = Repository::new(
            InMemoryEventStore::new(),
            EventBus::new(BusConfig::inline()),
        );
        AccountService::new(repository, CommandConfig::new(RetryPolicy::none()))
    }

    #[tokio::test]
    async fn open_then_move_money() {
        let service = service();
        let open = OpenAccount::for_holder("Jane", Money::from_dollars(1000));
        let id = open.account_id;

        let result = service.handle(open).await.unwrap();
        assert_eq!(result.version, Version::first());

        service
            .handle(Deposit::new(id, Money::from_dollars(500)))
            .await
            .unwrap();
        let result = service
            .handle(Withdraw::new(id, Money::from_dollars(200)))
            .await
            .unwrap();

        assert_eq!(result.state.balance(), Money::from_dollars(1300));
        assert_eq!(result.version, Version::new(3));
        assert_eq!(
            result.events,
            vec![AccountEvent::MoneyWithdrawn {
                amount: Money::from_dollars(200)
            }]
        );
    }

    #[tokio::test]
    async fn commands_on_unknown_account_are_not_found() {
        let service = service();
        let err = service
            .handle(Deposit::new(AggregateId::new(), Money::from_dollars(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn invalid_command_is_rejected_before_loading() {
        let service = service();
        // The account does not exist, so reaching the store would be NotFound.
        let err = service
            .handle(Withdraw::new(AggregateId::new(), Money::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn opening_an_existing_account_is_a_rule_violation() {
        let service = service();
        let open = OpenAccount::for_holder("Jane", Money::ZERO);
        let again = open.clone();
        service.handle(open).await.unwrap();

        let err = service.handle(again).await.unwrap_err();
        assert_eq!(err.rule::<AccountError>(), Some(&AccountError::AlreadyOpened));
    }

    #[tokio::test]
    async fn no_op_freeze_keeps_version() {
        let service = service();
        let open = OpenAccount::for_holder("Jane", Money::ZERO);
        let id = open.account_id;
        service.handle(open).await.unwrap();

        let frozen = service
            .handle(FreezeAccount::new(id, "review"))
            .await
            .unwrap();
        let again = service
            .handle(FreezeAccount::new(id, "review"))
            .await
            .unwrap();

        assert_eq!(frozen.version, Version::new(2));
        assert_eq!(again.version, Version::new(2));
        assert!(again.events.is_empty());
        assert_eq!(again.state.status(), AccountStatus::Frozen);

        service.handle(UnfreezeAccount::new(id)).await.unwrap();
        let closed = service
            .handle(CloseAccount::new(id, "customer request"))
            .await
            .unwrap();
        assert_eq!(closed.state.status(), AccountStatus::Closed);
        assert_eq!(service.load(id).await.unwrap().version(), Version::new(4));
    }
}
