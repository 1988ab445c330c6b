//! API Module
//!
//! Read-only HTTP surface for dashboards.
//! Nothing here mutates task state.

pub mod error;
pub mod health;
pub mod task;

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::service::StatusReader;

/// Create the API router with all endpoints
pub fn create_router(reader: StatusReader) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Task endpoints
        .route("/tasks", get(task::list_tasks))
        .route("/tasks/{id}", get(task::get_task))
        .route("/summary", get(task::get_summary))
        // Add state and middleware
        .with_state(reader)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve the status API until the listener fails
pub async fn serve(addr: &str, reader: StatusReader) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Status API listening on {}", listener.local_addr()?);

    axum::serve(listener, create_router(reader)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryTaskStore;
    use crate::testing::pending;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use mopflow_core::store::TaskStore;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn router() -> Router {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut running = pending("historical:Amon.pr");
        running.mark_submitted("12.gadi-pbs".into(), Utc::now()).unwrap();
        store.upsert(running).await.unwrap();
        store.upsert(pending("historical:Amon.tas")).await.unwrap();
        create_router(StatusReader::new(store))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, _) = get(router().await, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_store_outage() {
        let store = Arc::new(InMemoryTaskStore::new());
        let app = create_router(StatusReader::new(store.clone()));
        let (status, _) = get(app.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);

        store.set_unavailable(true);
        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Task store unavailable");
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let (status, body) = get(router().await, "/tasks?status=running").await;
        assert_eq!(status, StatusCode::OK);
        let tasks = body.as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["task_id"], "historical:Amon.pr");
        assert_eq!(tasks[0]["status"], "running");
    }

    #[tokio::test]
    async fn test_list_rejects_unknown_status() {
        let (status, body) = get(router().await, "/tasks?status=queued").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_get_task() {
        let (status, body) = get(router().await, "/tasks/historical:Amon.tas").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");

        let (status, _) = get(router().await, "/tasks/historical:Omon.tos").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_summary() {
        let (status, body) = get(router().await, "/summary").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_is_503() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.set_unavailable(true);
        let app = create_router(StatusReader::new(store));
        let (status, _) = get(app, "/tasks").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
