use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ScreenshotQuery {
    pub path: String,
}

/// Stream a PNG by repository-relative path, confined to the screenshot
/// and crash-report directories.
pub async fn screenshot(
    State(state): State<AppState>,
    Query(query): Query<ScreenshotQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let requested = PathBuf::from(&query.path)
        .canonicalize()
        .map_err(|_| (StatusCode::NOT_FOUND, "no such screenshot".to_string()))?;

    let allowed = [
        state.paths.screenshots_dir.canonicalize(),
        state.paths.crash_dir.canonicalize(),
    ];
    let inside = allowed
        .iter()
        .flatten()
        .any(|root| requested.starts_with(root));
    if !inside {
        return Err((
            StatusCode::FORBIDDEN,
            "path outside the run directories".to_string(),
        ));
    }

    let bytes = tokio::fs::read(&requested)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}
