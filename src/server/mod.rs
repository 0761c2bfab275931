use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::SheetClient;
use crate::api_routes::{self, AppState};
use crate::config::Config;
use crate::controller::SubmissionController;
use crate::counters;

pub async fn start_server(port: u16, config: &Config) -> anyhow::Result<()> {
    let controller = SubmissionController::new(
        SheetClient::from_config(&config.endpoint)?,
        counters::open_counters(config.counters.reset_scope),
        (&config.feedback).into(),
    );
    let state = Arc::new(AppState {
        controller,
        endpoint_url: config.endpoint.url.clone(),
        configured: config.endpoint.is_configured(),
    });

    // The form page is served from elsewhere, so the browser calls us cross-origin.
    let app = api_routes::api_routes(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, configured = config.endpoint.is_configured(), "starting local form API");
    println!("Form API listening at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
