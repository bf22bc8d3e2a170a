use axum::{extract::State, http::StatusCode};

use crate::api_state::ApiState;

/// Readiness probe: verifies the database connection answers.
pub async fn ready(State(state): State<ApiState>) -> StatusCode {
    match state.db.query("RETURN 1;").await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
