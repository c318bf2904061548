use anyhow::Context;
use clap::Parser;
use tracing::info;

/// Applies pending schema migrations without starting the server.
#[derive(Debug, Parser)]
#[command(name = "migration", version)]
struct Cli {
    /// Database URL; defaults to the configured `database_url`
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    let database_url = match cli.database_url {
        Some(url) => url,
        None => ender_outlet::config::load_config()
            .context("failed to load configuration")?
            .database_url,
    };

    info!("Starting database migration");
    ender_outlet::migrator::run_migration(&database_url).await?;
    info!("Migration completed successfully");
    Ok(())
}
