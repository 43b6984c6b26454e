// HTTP API server binary for the image migrator

use anyhow::Result;
use entry_image_migrator::api::ApiServer;
use entry_image_migrator::logging::init_tracing;
use entry_image_migrator::util::env as env_util;
use entry_image_migrator::{MigrationService, MigratorConfig};

#[actix_web::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing("info,sqlx=warn")?;
    env_util::bootstrap_cli("api_server");

    tracing::info!("Initializing migration API server");

    let server = ApiServer::from_env()?;
    let cfg = MigratorConfig::from_env()?;
    let service = MigrationService::connect(&cfg).await?;

    tracing::info!("Database connected successfully");

    server.run(service).await?;

    Ok(())
}
