use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::events::Envelope;
use crate::models::{Mode, RunConfig};
use crate::AppState;

/// Accept a run configuration and flip `started`; the orchestrator loop
/// picks it up on its next poll.
pub async fn start(
    State(state): State<AppState>,
    Json(config): Json<RunConfig>,
) -> Result<Json<Value>, (StatusCode, String)> {
    accept_start(&state, config)
}

/// Same intake as `start`, but the mode is forced to report-sending.
pub async fn start_report_sending(
    State(state): State<AppState>,
    Json(mut config): Json<RunConfig>,
) -> Result<Json<Value>, (StatusCode, String)> {
    config.mode = Mode::ReportSending;
    accept_start(&state, config)
}

fn accept_start(
    state: &AppState,
    config: RunConfig,
) -> Result<Json<Value>, (StatusCode, String)> {
    if config.manager.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "manager is required".to_string()));
    }
    let mode = config.mode;
    if !state.signals.request_start(config) {
        return Err((
            StatusCode::CONFLICT,
            "a run is already in progress".to_string(),
        ));
    }
    state
        .broadcaster
        .log_info(format!("start accepted (mode {})", mode.as_str()));
    Ok(Json(json!({ "started": true, "mode": mode.as_str() })))
}

pub async fn stop(State(state): State<AppState>) -> Json<Value> {
    state.signals.request_stop();
    state.broadcaster.log_info("stop requested by operator");
    Json(json!({ "stopping": true }))
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: Mode,
}

/// Live mode switch; takes effect at the orchestrator's next farm.
pub async fn set_mode(
    State(state): State<AppState>,
    Json(request): Json<ModeRequest>,
) -> Json<Value> {
    state.signals.set_mode(request.mode);
    state
        .broadcaster
        .log_info(format!("mode switched to {}", request.mode.as_str()));
    Json(json!({ "mode": request.mode.as_str() }))
}

#[derive(Debug, Deserialize)]
pub struct AddFarmsRequest {
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

/// Raise the farm cap mid-run.
pub async fn add_farms(
    State(state): State<AppState>,
    request: Option<Json<AddFarmsRequest>>,
) -> Json<Value> {
    let count = request.map_or(1, |Json(r)| r.count);
    let max_farms = state.signals.add_farms(count);
    state
        .broadcaster
        .send(Envelope::UpdateFarmCount { max_farms });
    Json(json!({ "max_farms": max_farms }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use crate::events::Broadcaster;
    use crate::journal::RunJournal;
    use crate::learning::LearningStore;
    use crate::signals::ControlSignals;
    use std::sync::Arc;

    fn state(dir: &std::path::Path) -> AppState {
        AppState {
            signals: Arc::new(ControlSignals::new()),
            broadcaster: Broadcaster::new(16),
            journal: Arc::new(RunJournal::open(dir.join("run_logs.json")).unwrap()),
            learning: Arc::new(LearningStore::open(dir.join("training.json")).unwrap()),
            paths: PathsConfig::default(),
        }
    }

    fn config(manager: &str) -> RunConfig {
        RunConfig {
            manager: manager.to_string(),
            mode: Mode::Normal,
            start_from: 0,
            max_farms: 10,
            credentials: None,
        }
    }

    #[tokio::test]
    async fn second_start_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        assert!(start(State(state.clone()), Json(config("김태우")))
            .await
            .is_ok());
        let err = start(State(state), Json(config("김태우"))).await.unwrap_err();
        assert_eq!(err.0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn blank_manager_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let err = start(State(state), Json(config("  "))).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn report_sending_start_forces_the_mode() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        start_report_sending(State(state.clone()), Json(config("김태우")))
            .await
            .unwrap();
        assert_eq!(state.signals.mode(), Mode::ReportSending);
    }

    #[tokio::test]
    async fn add_farms_defaults_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        state.signals.request_start(config("김태우"));
        let Json(body) = add_farms(State(state.clone()), None).await;
        assert_eq!(body["max_farms"], 11);
        let Json(body) =
            add_farms(State(state), Some(Json(AddFarmsRequest { count: 5 }))).await;
        assert_eq!(body["max_farms"], 16);
    }

    #[tokio::test]
    async fn stop_sets_the_flag() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        stop(State(state.clone())).await;
        assert!(state.signals.should_stop());
    }
}
