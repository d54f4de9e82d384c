//! Command handling infrastructure.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::AggregateId;
use event_store::{EventEnvelope, EventStore, Version};

use crate::aggregate::Aggregate;
use crate::error::{DomainError, ValidationError};
use crate::repository::Repository;

/// An intention to change one aggregate.
pub trait Command: std::fmt::Debug + Send + Sync + 'static {
    type Aggregate: Aggregate;

    /// Stable name used in logs and metric labels.
    fn name(&self) -> &'static str;

    fn aggregate_id(&self) -> AggregateId;

    /// Checks the command's own fields. Runs before anything is loaded.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Whether the command may run against an empty stream. Every other
    /// command gets `NotFound` for a missing aggregate.
    fn creates_aggregate(&self) -> bool {
        false
    }
}

/// One handler per command type.
#[async_trait]
pub trait Handles<C: Command> {
    async fn handle(&self, command: C) -> Result<CommandResult<C::Aggregate>, DomainError>;
}

/// Outcome of a successful command.
#[derive(Debug, Clone)]
pub struct CommandResult<A: Aggregate> {
    pub aggregate_id: AggregateId,

    /// State after the command's events.
    pub state: A,

    /// Stream version after the command. Unchanged when no events were
    /// produced.
    pub version: Version,

    pub events: Vec<A::Event>,

    /// Conflicts retried before the command went through.
    pub retries: u32,
}

/// What to do when an append loses an optimistic-concurrency race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Full reload/decide/append cycles attempted after the first conflict.
    pub max_retries: u32,

    /// Wait before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Surface the first conflict to the caller.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn bounded(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

/// Execution settings for a [`CommandHandler`]. There is no default; callers
/// pick their retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandConfig {
    pub retry: RetryPolicy,

    /// Limit on the load/decide/append round trip, retries included.
    /// Publishing and snapshotting happen after it and are not covered.
    pub timeout: Option<Duration>,
}

impl CommandConfig {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Runs commands against one aggregate type.
///
/// For each command: validate, then load, decide and append (repeated on
/// conflict as the retry policy allows, all under the optional timeout), then
/// publish the appended events and snapshot if due. Once the append lands
/// the command succeeds.
pub struct CommandHandler<S, A> {
    repository: Repository<S, A>,
    config: CommandConfig,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(repository: Repository<S, A>, config: CommandConfig) -> Self {
        Self { repository, config }
    }

    pub fn repository(&self) -> &Repository<S, A> {
        &self.repository
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    /// Executes `command`, with `decide` turning the current state into
    /// events. `decide` may run more than once when conflicts are retried.
    pub async fn execute<C, F>(
        &self,
        command: &C,
        decide: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        C: Command<Aggregate = A>,
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error> + Send + Sync,
    {
        let started = Instant::now();
        let result = self.run(command, &decide).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!("commands_total", "command" => command.name(), "outcome" => outcome)
            .increment(1);
        metrics::histogram!("command_duration_seconds", "command" => command.name())
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(done) => tracing::debug!(
                command = command.name(),
                aggregate_id = %done.aggregate_id,
                version = %done.version,
                events = done.events.len(),
                "command handled"
            ),
            Err(e) => tracing::info!(
                command = command.name(),
                aggregate_id = %command.aggregate_id(),
                error = %e,
                "command failed"
            ),
        }
        result
    }

    async fn run<C, F>(&self, command: &C, decide: &F) -> Result<CommandResult<A>, DomainError>
    where
        C: Command<Aggregate = A>,
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error> + Send + Sync,
    {
        command.validate()?;

        let committing = self.commit_with_retries(command, decide);
        let (result, committed) = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, committing)
                .await
                .map_err(|_| DomainError::Timeout(limit))??,
            None => committing.await?,
        };

        self.repository.publish(&committed).await;
        self.repository
            .snapshot_if_due(result.aggregate_id, &result.state, &committed)
            .await;
        Ok(result)
    }

    async fn commit_with_retries<C, F>(
        &self,
        command: &C,
        decide: &F,
    ) -> Result<(CommandResult<A>, Vec<EventEnvelope>), DomainError>
    where
        C: Command<Aggregate = A>,
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error> + Send + Sync,
    {
        let mut retries = 0;
        loop {
            match self.attempt(command, decide).await {
                Err(e) if e.is_conflict() && retries < self.config.retry.max_retries => {
                    retries += 1;
                    metrics::counter!("command_concurrency_retries_total", "command" => command.name())
                        .increment(1);
                    tracing::debug!(
                        command = command.name(),
                        aggregate_id = %command.aggregate_id(),
                        retry = retries,
                        "concurrency conflict; reloading"
                    );
                    let delay = self.config.retry.delay_for(retries);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok((mut result, committed)) => {
                    result.retries = retries;
                    return Ok((result, committed));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt<C, F>(
        &self,
        command: &C,
        decide: &F,
    ) -> Result<(CommandResult<A>, Vec<EventEnvelope>), DomainError>
    where
        C: Command<Aggregate = A>,
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error> + Send + Sync,
    {
        let id = command.aggregate_id();
        let mut root = if command.creates_aggregate() {
            self.repository.load_or_new(id).await?
        } else {
            self.repository.get_by_id(id).await?
        };

        root.execute(decide).map_err(DomainError::rule_violation)?;
        let events = root
            .uncommitted_events()
            .iter()
            .map(|recorded| recorded.event.clone())
            .collect();
        let committed = self.repository.commit(&mut root).await?;

        let result = CommandResult {
            aggregate_id: id,
            version: root.version(),
            state: root.into_state(),
            events,
            retries: 0,
        };
        Ok((result, committed))
    }
}
