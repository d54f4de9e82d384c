//! A scripted day at the bank, run by the binary and the integration tests.

use common::AggregateId;
use domain::{
    AccountError, CloseAccount, Deposit, DomainError, FreezeAccount, Handles, Money, OpenAccount,
    UnfreezeAccount, Withdraw,
};
use event_store::EventStore;

use crate::error::AppError;
use crate::system::BankSystem;

/// What the demo did, for printing and assertions.
#[derive(Debug, Clone)]
pub struct DemoOutcome {
    pub checking: AggregateId,
    pub savings: AggregateId,
    pub closed: AggregateId,
    /// Commands the domain refused, with the reason.
    pub rejected: Vec<String>,
    /// Concurrency conflicts retried across the racing withdrawals. A conflict
    /// that outlives the retry policy lands in `rejected` instead.
    pub retries: u32,
    pub rebuild_matches: bool,
}

/// Runs the four account scenarios against `system`.
#[tracing::instrument(skip_all)]
pub async fn run<S: EventStore + Clone + 'static>(
    system: &BankSystem<S>,
) -> Result<DemoOutcome, AppError> {
    let accounts = system.accounts();
    let mut rejected = Vec::new();

    // Open, deposit, withdraw.
    let open = OpenAccount::for_holder("Jane", Money::from_dollars(1000));
    let checking = open.account_id;
    accounts.handle(open).await?;
    accounts
        .handle(Deposit::new(checking, Money::from_dollars(500)))
        .await?;
    accounts
        .handle(Withdraw::new(checking, Money::from_dollars(200)))
        .await?;

    // Overdraft is refused and records nothing.
    match refusal(
        accounts
            .handle(Withdraw::new(checking, Money::from_dollars(5000)))
            .await,
    )? {
        Some(e @ AccountError::InsufficientFunds { .. }) => {
            tracing::info!(error = %e, "overdraft refused");
            rejected.push(e.to_string());
        }
        Some(e) => return Err(DomainError::rule_violation(e).into()),
        None => tracing::error!("overdraft was accepted"),
    }

    // Two withdrawals race on the same version; the loser reloads and retries.
    let (first, second) = tokio::join!(
        accounts.handle(Withdraw::new(checking, Money::from_dollars(100))),
        accounts.handle(Withdraw::new(checking, Money::from_dollars(100))),
    );
    let mut retries = 0;
    for result in [first, second] {
        match result {
            Ok(done) => retries += done.retries,
            Err(e) if e.is_conflict() => rejected.push(e.to_string()),
            Err(e) => return Err(e.into()),
        }
    }

    // A second account for the same holder, frozen and thawed.
    let open = OpenAccount::for_holder("Jane", Money::ZERO);
    let savings = open.account_id;
    accounts.handle(open).await?;
    accounts
        .handle(Deposit::new(savings, Money::from_cents(25_050)))
        .await?;
    accounts
        .handle(FreezeAccount::new(savings, "address check"))
        .await?;
    if let Some(e) = refusal(
        accounts
            .handle(Withdraw::new(savings, Money::from_dollars(1)))
            .await,
    )? {
        rejected.push(e.to_string());
    }
    accounts.handle(UnfreezeAccount::new(savings)).await?;

    // An account that is emptied and closed.
    let open = OpenAccount::for_holder("John", Money::from_dollars(40));
    let closed = open.account_id;
    accounts.handle(open).await?;
    if let Some(e) = refusal(
        accounts
            .handle(CloseAccount::new(closed, "moving abroad"))
            .await,
    )? {
        rejected.push(e.to_string());
    }
    accounts
        .handle(Withdraw::new(closed, Money::from_dollars(40)))
        .await?;
    accounts
        .handle(CloseAccount::new(closed, "moving abroad"))
        .await?;

    // Rebuilt read models must equal the live ones.
    let rebuild_matches = system.verify_rebuild().await?;

    Ok(DemoOutcome {
        checking,
        savings,
        closed,
        rejected,
        retries,
        rebuild_matches,
    })
}

/// The account rule that refused a command, `None` if it went through.
/// Any other failure is passed on.
fn refusal<T>(result: Result<T, DomainError>) -> Result<Option<AccountError>, DomainError> {
    match result {
        Ok(_) => Ok(None),
        Err(e) => match e.rule::<AccountError>() {
            Some(rule) => Ok(Some(rule.clone())),
            None => Err(e),
        },
    }
}
