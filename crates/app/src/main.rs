//! Bank demo entry point.

use app::{AppError, BankSystem, Config, demo, telemetry};
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{GetHolderPortfolio, GetTransactionHistory, ListAccounts, QueryHandler};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;
    telemetry::init_tracing(&config.log_filter, config.log_format)?;
    let metrics = telemetry::install_metrics()?;

    match config.database_url.as_deref() {
        Some(url) => {
            tracing::info!("using PostgreSQL event store");
            let store = PostgresEventStore::connect(url).await?;
            run(store, &config, &metrics).await
        }
        None => {
            tracing::info!("DATABASE_URL not set; using in-memory event store");
            run(InMemoryEventStore::new(), &config, &metrics).await
        }
    }
}

async fn run<S: EventStore + Clone + 'static>(
    store: S,
    config: &Config,
    metrics: &PrometheusHandle,
) -> Result<(), AppError> {
    let system = BankSystem::start(store, config).await?;
    let outcome = demo::run(&system).await?;
    system.settle().await;

    let queries = system.queries();
    let accounts = queries.handle(ListAccounts::default()).await?;
    println!("accounts:\n{}", serde_json::to_string_pretty(&accounts)?);

    let jane = queries
        .handle(GetHolderPortfolio {
            holder: "Jane".to_string(),
        })
        .await?;
    println!("portfolio:\n{}", serde_json::to_string_pretty(&jane)?);

    let statement = queries
        .handle(GetTransactionHistory {
            account_id: outcome.checking,
            limit: Some(5),
        })
        .await?;
    println!("recent activity:\n{}", serde_json::to_string_pretty(&statement)?);

    for reason in &outcome.rejected {
        println!("rejected: {reason}");
    }
    println!(
        "conflict retries: {}, rebuild matches live: {}, dead letters: {}",
        outcome.retries,
        outcome.rebuild_matches,
        system.dead_letters().await.len()
    );
    for (name, entries) in system.read_model_sizes().await {
        println!("{name}: {entries} entries");
    }

    system.shutdown().await;
    println!("{}", metrics.render());
    Ok(())
}
