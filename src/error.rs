use std::time::Duration;

use crate::models::MIN_POINTS;

/// Failures of the series extractor (C1). All of these are local to one
/// date and surface as a `DataShape` automation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("no known series shape in payload")]
    NoKnownShape,
    #[error("no numeric sensor field in series entries")]
    NoNumericSensor,
    #[error("too few points for analysis: {got} < {MIN_POINTS}")]
    TooFewPoints { got: usize },
}

/// Error taxonomy of the automation pipeline. The orchestrator catches at
/// the per-date boundary by default, at the per-farm boundary for
/// farm-level DOM contract misses, and at the run boundary for auth
/// failures and operator stop.
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("network: {0}")]
    Network(String),
    #[error("capture timed out after {}s", .0.as_secs())]
    CaptureTimeout(Duration),
    #[error("data shape: {0}")]
    DataShape(#[from] ExtractError),
    #[error("dom contract: {what} not found ({selector})")]
    DomContract { what: String, selector: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("click verification failed: {0}")]
    ClickVerification(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("stopped by operator")]
    OperatorAbort,
}

impl AutomationError {
    /// True when the whole run must abort rather than moving to the next
    /// date or farm.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AutomationError::Auth(_) | AutomationError::OperatorAbort
        )
    }
}
