//! Wires the write side, the bus and the read side together.

use std::sync::Arc;

use domain::{AccountService, Repository};
use event_bus::{DeadLetter, EventBus, SubscriptionHandle};
use event_store::EventStore;
use projections::{
    AccountQueries, AccountSummaryView, CatchUpReport, HolderPortfolioView, ProjectionProcessor,
    ReadModel, TransactionHistoryView,
};

use crate::config::Config;
use crate::error::AppError;

/// A running bank: commands in through [`BankSystem::accounts`], reads out
/// through [`BankSystem::queries`].
pub struct BankSystem<S: EventStore> {
    accounts: Arc<AccountService<S>>,
    queries: AccountQueries,
    bus: EventBus,
    processor: ProjectionProcessor<S>,
    summaries: AccountSummaryView,
    portfolios: HolderPortfolioView,
    history: TransactionHistoryView,
    subscriptions: Vec<SubscriptionHandle>,
}

impl<S: EventStore + Clone + 'static> BankSystem<S> {
    /// Subscribes the views, catches them up with whatever the store already
    /// holds, then opens the write side.
    ///
    /// Subscribing first means nothing committed during catch-up is missed;
    /// the views drop whatever they see twice.
    #[tracing::instrument(skip_all)]
    pub async fn start(store: S, config: &Config) -> Result<Self, AppError> {
        let bus = EventBus::new(config.bus.clone());

        let summaries = AccountSummaryView::new();
        let portfolios = HolderPortfolioView::new();
        let history = TransactionHistoryView::new();
        let mut processor = ProjectionProcessor::new(store.clone());
        processor.register(Arc::new(summaries.clone()));
        processor.register(Arc::new(portfolios.clone()));
        processor.register(Arc::new(history.clone()));

        let subscriptions = processor.subscribe_all(&bus).await;
        let report = processor.run_catch_up().await?;
        log_report("catch-up", &report);

        let repository =
            Repository::new(store, bus.clone()).with_snapshots(config.snapshot_interval);
        let accounts = Arc::new(AccountService::new(repository, config.command));
        let queries = AccountQueries::new(summaries.clone(), portfolios.clone(), history.clone());

        tracing::info!(
            mode = ?config.bus.mode,
            projections = processor.projection_count(),
            "bank system started"
        );
        let system = Self {
            accounts,
            queries,
            bus,
            processor,
            summaries,
            portfolios,
            history,
            subscriptions,
        };
        for (name, entries) in system.read_model_sizes().await {
            tracing::info!(read_model = name, entries, "read model loaded");
        }
        Ok(system)
    }

    pub fn accounts(&self) -> &Arc<AccountService<S>> {
        &self.accounts
    }

    pub fn queries(&self) -> &AccountQueries {
        &self.queries
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Waits until the views have seen every committed event.
    pub async fn settle(&self) {
        self.bus.settle().await;
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.bus.dead_letters().await
    }

    /// Entry count of each read model, by name.
    pub async fn read_model_sizes(&self) -> Vec<(&'static str, usize)> {
        let models: [&dyn ReadModel; 3] = [&self.summaries, &self.portfolios, &self.history];
        let mut sizes = Vec::with_capacity(models.len());
        for model in models {
            sizes.push((model.name(), model.count().await));
        }
        sizes
    }

    /// Rebuilds every view from the store and reports whether the result
    /// equals what live delivery had produced.
    #[tracing::instrument(skip(self))]
    pub async fn verify_rebuild(&self) -> Result<bool, AppError> {
        self.settle().await;
        let summaries = self.summaries.snapshot().await;
        let portfolios = self.portfolios.snapshot().await;
        let history = self.history.snapshot().await;

        let report = self.processor.rebuild_all().await?;
        log_report("rebuild", &report);

        let matches = summaries == self.summaries.snapshot().await
            && portfolios == self.portfolios.snapshot().await
            && history == self.history.snapshot().await;
        if !matches {
            tracing::error!("rebuilt read models differ from live ones");
        }
        Ok(matches)
    }

    /// Drains outstanding deliveries and stops the bus workers.
    pub async fn shutdown(self) {
        self.settle().await;
        metrics::gauge!("event_bus_dead_letters_pending").set(self.dead_letters().await.len() as f64);
        for handle in &self.subscriptions {
            self.bus.unsubscribe(handle).await;
        }
        self.bus.shutdown().await;
        tracing::info!("bank system stopped");
    }
}

fn log_report(stage: &str, report: &CatchUpReport) {
    for failure in &report.failures {
        tracing::warn!(
            stage,
            projection = failure.projection,
            event_id = %failure.event_id,
            error = %failure.error,
            "projection left behind"
        );
    }
    tracing::info!(stage, events = report.events_read, "projections caught up");
}
