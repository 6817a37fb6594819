use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level config loaded from `irrigo.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webdriver: WebDriverConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub window: DateWindowConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// First port to try; incremented when already in use.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebDriverConfig {
    #[serde(default = "default_webdriver_url")]
    pub url: String,
    #[serde(default)]
    pub headless: bool,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: default_webdriver_url(),
            headless: false,
        }
    }
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

/// Everything the core needs to know about the target site's DOM. Selector
/// changes land here, not in the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_manager_radio")]
    pub manager_radio: String,
    #[serde(default = "default_farm_links")]
    pub farm_links: String,
    #[serde(default = "default_chart_container")]
    pub chart_container: String,
    #[serde(default = "default_time_inputs")]
    pub time_inputs: String,
    #[serde(default = "default_prev_period")]
    pub prev_period_button: String,
    #[serde(default = "default_next_period")]
    pub next_period_button: String,
    #[serde(default = "default_login_username")]
    pub login_username: String,
    #[serde(default = "default_login_password")]
    pub login_password: String,
    #[serde(default = "default_login_submit")]
    pub login_submit: String,
    #[serde(default = "default_report_button_text")]
    pub report_button_text: String,
    #[serde(default)]
    pub labels: TableLabels,
}

impl Default for SiteConfig {
    fn default() -> Self {
        // serde would do the same; spelled out for non-serde construction
        Self {
            base_url: default_base_url(),
            manager_radio: default_manager_radio(),
            farm_links: default_farm_links(),
            chart_container: default_chart_container(),
            time_inputs: default_time_inputs(),
            prev_period_button: default_prev_period(),
            next_period_button: default_next_period(),
            login_username: default_login_username(),
            login_password: default_login_password(),
            login_submit: default_login_submit(),
            report_button_text: default_report_button_text(),
            labels: TableLabels::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://dashboard.example-agri.io".to_string()
}

fn default_manager_radio() -> String {
    ".chakra-segment-group__itemText".to_string()
}

fn default_farm_links() -> String {
    "div.css-nd8svt a[href*=\"/report/point/\"]".to_string()
}

fn default_chart_container() -> String {
    ".highcharts-container".to_string()
}

fn default_time_inputs() -> String {
    "input[type=\"time\"]".to_string()
}

fn default_prev_period() -> String {
    "button[aria-label=\"이전 기간\"]".to_string()
}

fn default_next_period() -> String {
    "button[aria-label=\"다음 기간\"]".to_string()
}

fn default_login_username() -> String {
    "input[name=\"username\"], input[type=\"email\"]".to_string()
}

fn default_login_password() -> String {
    "input[type=\"password\"]".to_string()
}

fn default_login_submit() -> String {
    "button[type=\"submit\"]".to_string()
}

fn default_report_button_text() -> String {
    "리포트 생성".to_string()
}

/// Labeled cells the table inspector reads from the right-hand panel.
#[derive(Debug, Clone, Deserialize)]
pub struct TableLabels {
    #[serde(default = "default_first_cell")]
    pub first_cell: String,
    #[serde(default = "default_last_cell")]
    pub last_cell: String,
    #[serde(default = "default_night_deviation")]
    pub night_deviation: String,
    #[serde(default = "default_last_feed")]
    pub last_feed: String,
    #[serde(default = "default_first_feed")]
    pub first_feed: String,
    #[serde(default = "default_sunrise")]
    pub sunrise: String,
}

impl Default for TableLabels {
    fn default() -> Self {
        Self {
            first_cell: default_first_cell(),
            last_cell: default_last_cell(),
            night_deviation: default_night_deviation(),
            last_feed: default_last_feed(),
            first_feed: default_first_feed(),
            sunrise: default_sunrise(),
        }
    }
}

fn default_first_cell() -> String {
    "구역 1 첫 급액 시간 1 (시분)".to_string()
}

fn default_last_cell() -> String {
    "구역 1 마지막 급액 시간 1 (시분)".to_string()
}

fn default_night_deviation() -> String {
    "야간 함수율 편차".to_string()
}

fn default_last_feed() -> String {
    "마지막 급액 시간".to_string()
}

fn default_first_feed() -> String {
    "첫 급액 시간".to_string()
}

fn default_sunrise() -> String {
    "일출 시".to_string()
}

/// Hard deadlines of the pipeline. On expiry the surrounding state
/// transitions to its failure branch.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_navigation_secs")]
    pub navigation_secs: u64,
    #[serde(default = "default_capture_secs")]
    pub capture_secs: u64,
    #[serde(default = "default_chart_render_secs")]
    pub chart_render_secs: u64,
    #[serde(default = "default_login_ui_secs")]
    pub login_ui_secs: u64,
    #[serde(default = "default_post_login_secs")]
    pub post_login_secs: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_learning_wait_secs")]
    pub learning_wait_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_secs: default_navigation_secs(),
            capture_secs: default_capture_secs(),
            chart_render_secs: default_chart_render_secs(),
            login_ui_secs: default_login_ui_secs(),
            post_login_secs: default_post_login_secs(),
            settle_ms: default_settle_ms(),
            learning_wait_secs: default_learning_wait_secs(),
        }
    }
}

fn default_navigation_secs() -> u64 {
    15
}

fn default_capture_secs() -> u64 {
    15
}

fn default_chart_render_secs() -> u64 {
    10
}

fn default_login_ui_secs() -> u64 {
    10
}

fn default_post_login_secs() -> u64 {
    15
}

fn default_settle_ms() -> u64 {
    800
}

fn default_learning_wait_secs() -> u64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_training_dir")]
    pub training_dir: PathBuf,
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_screenshots_dir")]
    pub screenshots_dir: PathBuf,
    #[serde(default = "default_crash_dir")]
    pub crash_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            training_dir: default_training_dir(),
            history_dir: default_history_dir(),
            data_dir: default_data_dir(),
            screenshots_dir: default_screenshots_dir(),
            crash_dir: default_crash_dir(),
        }
    }
}

impl PathsConfig {
    pub fn training_file(&self) -> PathBuf {
        self.training_dir.join("training-data.json")
    }

    pub fn journal_file(&self) -> PathBuf {
        self.history_dir.join("run_logs.json")
    }

    /// Create every run directory up front; treated as process-wide state
    /// with init on boot and no teardown.
    pub fn init_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.training_dir,
            &self.history_dir,
            &self.data_dir,
            &self.screenshots_dir,
            &self.crash_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn default_training_dir() -> PathBuf {
    PathBuf::from("training")
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("history")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_screenshots_dir() -> PathBuf {
    PathBuf::from("screenshots")
}

fn default_crash_dir() -> PathBuf {
    PathBuf::from("crash-reports")
}

/// How far back the date loop reaches. `days_back = 5` processes T−5
/// through T−0, oldest first.
#[derive(Debug, Clone, Deserialize)]
pub struct DateWindowConfig {
    #[serde(default = "default_days_back")]
    pub days_back: u32,
}

impl Default for DateWindowConfig {
    fn default() -> Self {
        Self {
            days_back: default_days_back(),
        }
    }
}

fn default_days_back() -> u32 {
    5
}

impl AppConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_numeric_contract() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.timeouts.navigation_secs, 15);
        assert_eq!(cfg.timeouts.capture_secs, 15);
        assert_eq!(cfg.timeouts.chart_render_secs, 10);
        assert_eq!(cfg.timeouts.login_ui_secs, 10);
        assert_eq!(cfg.timeouts.post_login_secs, 15);
        assert_eq!(cfg.window.days_back, 5);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9100

            [site]
            base_url = "https://farm.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.site.base_url, "https://farm.example.com");
        assert_eq!(cfg.site.chart_container, ".highcharts-container");
        assert_eq!(cfg.site.labels.first_cell, "구역 1 첫 급액 시간 1 (시분)");
    }
}
