use serde::{Deserialize, Serialize};

/// Operating mode for a run. Selected at start, switchable live through
/// the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Normal,
    Watch,
    Learning,
    ReportSending,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Watch => "watch",
            Mode::Learning => "learning",
            Mode::ReportSending => "report-sending",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Mode::Normal),
            "watch" => Ok(Mode::Watch),
            "learning" => Ok(Mode::Learning),
            "report-sending" => Ok(Mode::ReportSending),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// Keep the password out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Operator configuration accepted by `/control/start`. Immutable for the
/// duration of a run once accepted; `max_farms` is the sole exception and
/// may be atomically increased mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub manager: String,
    #[serde(default)]
    pub mode: Mode,
    /// 1-based farm index to start from; 0 means all farms.
    #[serde(default)]
    pub start_from: usize,
    #[serde(default = "default_max_farms")]
    pub max_farms: usize,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

fn default_max_farms() -> usize {
    200
}

/// Derived progress state streamed to dashboard subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub farm_index: usize,
    pub total_farms: usize,
    pub farm_name: String,
    pub step: String,
    pub percent: f64,
}

/// One append-only journal row per run. Readers must tolerate missing
/// fields from older entries, hence the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJournalEntry {
    pub run_id: String,
    pub started_at: String,
    pub ended_at: String,
    #[serde(default)]
    pub duration_secs: i64,
    pub manager: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub requested_farms: usize,
    #[serde(default)]
    pub farms_completed: usize,
    #[serde(default)]
    pub dates_processed: usize,
    #[serde(default)]
    pub charts_clicked: usize,
    #[serde(default)]
    pub success: usize,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub error: usize,
    #[serde(default)]
    pub no_irrigation: usize,
    #[serde(default)]
    pub reports_created: usize,
    /// Date range actually seen, e.g. "2026-01-01..2026-01-06".
    #[serde(default)]
    pub date_range: String,
    /// "completed", "stopped" or "failed".
    #[serde(default)]
    pub outcome: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_kebab_case() {
        let m: Mode = serde_json::from_str("\"report-sending\"").unwrap();
        assert_eq!(m, Mode::ReportSending);
        assert_eq!(serde_json::to_string(&Mode::Watch).unwrap(), "\"watch\"");
    }

    #[test]
    fn run_config_defaults() {
        let cfg: RunConfig = serde_json::from_str(r#"{"manager":"김태우"}"#).unwrap();
        assert_eq!(cfg.mode, Mode::Normal);
        assert_eq!(cfg.start_from, 0);
        assert_eq!(cfg.max_farms, 200);
        assert!(cfg.credentials.is_none());
    }

    #[test]
    fn journal_reader_tolerates_missing_fields() {
        let old = r#"{"run_id":"a","started_at":"x","ended_at":"y","manager":"m"}"#;
        let entry: RunJournalEntry = serde_json::from_str(old).unwrap();
        assert_eq!(entry.farms_completed, 0);
        assert_eq!(entry.outcome, "");
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let c = Credentials {
            username: "farm-op".to_string(),
            password: "hunter2".to_string(),
        };
        let dbg = format!("{c:?}");
        assert!(dbg.contains("farm-op"));
        assert!(!dbg.contains("hunter2"));
    }
}
