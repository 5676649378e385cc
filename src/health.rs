//! Process liveness endpoint, independent of the scheduler.

use axum::Router;
use axum::routing::get;

pub fn health_routes() -> Router {
    Router::new().route("/health/live", get(|| async { "ok" }))
}

/// Serve the health router on its own listener.
pub fn spawn_health_server(port: u16) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(port, error = %e, "Failed to bind health check port");
                return;
            }
        };
        tracing::info!(port, "Health check listening");
        axum::serve(listener, health_routes()).await.ok();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn start() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, health_routes()).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        port
    }

    #[tokio::test]
    async fn live_endpoint_returns_ok() {
        let port = start().await;
        let resp = reqwest::get(format!("http://127.0.0.1:{port}/health/live"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let port = start().await;
        let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }
}
