use axum::http::StatusCode;

/// Liveness probe.
pub async fn live() -> StatusCode {
    StatusCode::OK
}
