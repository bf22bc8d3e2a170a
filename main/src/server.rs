mod bootstrap;

use api_router::api_routes_v1;
use axum::Router;
use bootstrap::{build_services, init_tracing};
use common::utils::config::get_config;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = get_config()?;
    let services = build_services(config).await?;

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&services.api_state))
        .with_state(services.api_state.clone());

    info!("Starting server listening on 0.0.0.0:{}", services.config.http_port);
    let serve_address = format!("0.0.0.0:{}", services.config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
