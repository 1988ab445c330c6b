//! Health Check API Handler
//!
//! Reports whether the task store behind the dashboard answers queries.

use axum::{extract::State, http::StatusCode};

use super::error::ApiResult;
use crate::service::StatusReader;

/// GET /health
/// 200 while the store is reachable, 503 once it stops answering
pub async fn health_check(State(reader): State<StatusReader>) -> ApiResult<(StatusCode, String)> {
    let running = reader.ping().await?;
    tracing::debug!("Health check ok, {} task(s) running", running);
    Ok((StatusCode::OK, "OK".to_string()))
}
