use anyhow::Result;
use follows::config::{Config, Settings};
use follows::metrics::describe_metrics;
use follows::migrations::apply_migrations;
use follows::Repo;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
    info!("Starting follows schema setup");

    let config = Config::new("config")?;
    let settings = config.get::<Settings>()?;
    let follows_config = settings.follows_config()?;
    describe_metrics();

    info!("Connecting to {}", settings.database_url);
    let repo = Repo::connect(
        &settings.database_url,
        settings.max_connections,
        follows_config,
    )
    .await?;

    apply_migrations(repo.pool(), repo.config()).await?;

    info!(
        "Pivot table {} ready with {} follow records",
        repo.config().table(),
        repo.count_all().await?
    );

    repo.pool().close().await;
    Ok(())
}
