//! Control-plane HTTP server. Localhost tool: CORS is permissive and
//! there is no auth; the interesting part is the push stream and the
//! port-retry bind.

use axum::{routing::get, routing::post, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::pages::dashboard))
        .route("/history", get(handlers::pages::history))
        .route("/api/history", get(handlers::history::api_history))
        .route("/events", get(handlers::events::events))
        .route("/screenshot", get(handlers::screenshot::screenshot))
        .route("/learning-data", get(handlers::learning::learning_data))
        .route("/control/start", post(handlers::control::start))
        .route(
            "/control/start-report-sending",
            post(handlers::control::start_report_sending),
        )
        .route("/control/stop", post(handlers::control::stop))
        .route("/control/mode", post(handlers::control::set_mode))
        .route("/control/add-farms", post(handlers::control::add_farms))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve forever. When the preferred port is taken the next one
/// is tried, so a crashed instance never blocks a restart.
pub async fn serve(state: AppState, host: &str, first_port: u16) -> anyhow::Result<()> {
    let listener = bind_with_retry(host, first_port).await?;
    tracing::info!("control plane listening on http://{}", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

async fn bind_with_retry(host: &str, first_port: u16) -> anyhow::Result<tokio::net::TcpListener> {
    let mut port = first_port;
    loop {
        match tokio::net::TcpListener::bind((host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                let next = port.checked_add(1).ok_or_else(|| {
                    anyhow::anyhow!("no free port at or above {first_port}")
                })?;
                tracing::warn!("port {port} in use, trying {next}");
                port = next;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_retry_walks_past_a_busy_port() {
        let busy = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let busy_port = busy.local_addr().unwrap().port();

        let listener = bind_with_retry("127.0.0.1", busy_port).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), busy_port + 1);
    }
}
