pub mod browser;
pub mod clicker;
pub mod config;
pub mod crash;
pub mod detector;
pub mod error;
pub mod events;
pub mod extract;
pub mod handlers;
pub mod interceptor;
pub mod journal;
pub mod learning;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod signals;
pub mod table;

use std::sync::Arc;

use config::PathsConfig;
use events::Broadcaster;
use journal::RunJournal;
use learning::LearningStore;
use signals::ControlSignals;

#[derive(Clone)]
pub struct AppState {
    pub signals: Arc<ControlSignals>,
    pub broadcaster: Broadcaster,
    pub journal: Arc<RunJournal>,
    pub learning: Arc<LearningStore>,
    pub paths: PathsConfig,
}
