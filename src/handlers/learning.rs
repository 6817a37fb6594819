use axum::{extract::State, http::StatusCode, Json};

use crate::models::AveragedOffsets;
use crate::AppState;

/// Averaged correction offsets, as the dashboard's training panel shows
/// them.
pub async fn learning_data(
    State(state): State<AppState>,
) -> Result<Json<AveragedOffsets>, (StatusCode, String)> {
    state
        .learning
        .averaged_offsets()
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
