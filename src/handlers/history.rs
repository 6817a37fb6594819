use axum::{extract::State, http::StatusCode, Json};

use crate::models::RunJournalEntry;
use crate::AppState;

pub async fn api_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<RunJournalEntry>>, (StatusCode, String)> {
    state
        .journal
        .list()
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
