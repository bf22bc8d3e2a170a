mod bootstrap;

use bootstrap::{build_services, init_tracing};
use common::utils::config::get_config;
use ingestion_pipeline::run_worker_loop;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = get_config()?;
    let services = build_services(config).await?;

    info!("Starting embedding worker");
    run_worker_loop(services.db, services.ingestion).await
}
