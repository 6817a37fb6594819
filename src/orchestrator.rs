//! Per-run state machine: authenticate, select the manager, walk farms,
//! and for each farm walk the date window oldest to newest through the
//! capture → extract → detect → decide → act → verify → record pipeline.
//!
//! Error containment: per-date by default, per-farm for farm-level DOM
//! misses, per-run for auth failures and operator stop. Every run appends
//! exactly one journal entry, whatever the exit path.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use url::Url;

use crate::browser::Browser;
use crate::clicker::{ChartClicker, ClickOutcome, PlannedClick};
use crate::config::AppConfig;
use crate::crash::write_crash_report;
use crate::detector::{detect_events, Detection};
use crate::error::AutomationError;
use crate::events::{Broadcaster, Envelope};
use crate::extract::extract_series;
use crate::interceptor::NetworkInterceptor;
use crate::journal::RunJournal;
use crate::learning::LearningStore;
use crate::models::{
    AveragedOffsets, ClickPoint, DateRangeInfo, DateResult, DateStatus, FarmLink, FarmRecord,
    LearningSample, Mode, ProgressSnapshot, RunConfig, RunJournalEntry, RunOutput, SensorSeries,
    SlotPair,
};
use crate::signals::ControlSignals;
use crate::table::{decide, validate_report_row, DateAction, TableInspector, TimeCells};

const CHART_POLL_MS: u64 = 100;

/// Anchor texts that are navigation chrome, never farms.
const EXCLUDED_TEXTS: [&str; 2] = ["전체 보기", "저장"];

/// Chart legend captions that leak into anchor scraping.
const LEGEND_TEXTS: [&str; 3] = ["함수율", "슬라브 중량", "급액량"];

#[derive(Debug, Default)]
struct RunCounters {
    farms_completed: usize,
    dates_processed: usize,
    charts_clicked: usize,
    success: usize,
    skip: usize,
    error: usize,
    no_irrigation: usize,
    reports_created: usize,
    min_date: Option<NaiveDate>,
    max_date: Option<NaiveDate>,
}

impl RunCounters {
    fn record_date(&mut self, result: &DateResult) {
        self.dates_processed += 1;
        match result.status {
            DateStatus::Filled => self.success += 1,
            DateStatus::AlreadyFilled | DateStatus::Skipped => self.skip += 1,
            DateStatus::NoIrrigation => self.no_irrigation += 1,
            DateStatus::Error => self.error += 1,
        }
        self.min_date = Some(self.min_date.map_or(result.date, |d| d.min(result.date)));
        self.max_date = Some(self.max_date.map_or(result.date, |d| d.max(result.date)));
    }

    fn date_range(&self) -> String {
        match (self.min_date, self.max_date) {
            (Some(min), Some(max)) => format!("{min}..{max}"),
            _ => String::new(),
        }
    }
}

pub struct Orchestrator<B: Browser> {
    browser: B,
    cfg: AppConfig,
    run_cfg: RunConfig,
    signals: Arc<ControlSignals>,
    events: Broadcaster,
    interceptor: NetworkInterceptor,
    journal: Arc<RunJournal>,
    learning: Arc<LearningStore>,
    inspector: TableInspector,
    counters: RunCounters,
    learned_offsets: AveragedOffsets,
    run_id: String,
    started_at: DateTime<Utc>,
    output_path: PathBuf,
}

impl<B: Browser> Orchestrator<B> {
    pub fn new(
        browser: B,
        cfg: AppConfig,
        run_cfg: RunConfig,
        signals: Arc<ControlSignals>,
        events: Broadcaster,
        journal: Arc<RunJournal>,
        learning: Arc<LearningStore>,
    ) -> Self {
        let started_at = Utc::now();
        let output_path = cfg.paths.data_dir.join(format!(
            "all-farms-data-{}.json",
            started_at.format("%Y%m%d-%H%M%S")
        ));
        let inspector = TableInspector::new(cfg.site.labels.clone());
        Self {
            browser,
            cfg,
            run_cfg,
            signals,
            events,
            interceptor: NetworkInterceptor::new(),
            journal,
            learning,
            inspector,
            counters: RunCounters::default(),
            learned_offsets: AveragedOffsets::default(),
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            output_path,
        }
    }

    /// Drive the whole run and append its single journal entry.
    pub async fn run(mut self) -> anyhow::Result<RunJournalEntry> {
        self.events.send(Envelope::Manager {
            manager: self.run_cfg.manager.clone(),
        });
        self.events
            .status("running", format!("run started for {}", self.run_cfg.manager));

        // Offsets learned from past corrections shift every click, except
        // while we are collecting new corrections.
        if self.run_cfg.mode != Mode::Learning {
            self.learned_offsets = self.learning.averaged_offsets().unwrap_or_default();
            if self.learned_offsets.samples > 0 {
                self.events.log_info(format!(
                    "applying learned offsets from {} correction(s)",
                    self.learned_offsets.samples
                ));
            }
        }

        let outcome = match self.run_inner().await {
            Ok(()) => {
                self.events.status("done", "run completed");
                "completed"
            }
            Err(AutomationError::OperatorAbort) => {
                self.events.status("stopped", "stopped by operator");
                "stopped"
            }
            Err(e) => {
                tracing::error!("orchestrator: run failed: {e}");
                self.events.status("error", e.to_string());
                if matches!(e, AutomationError::Auth(_)) {
                    if let Err(report_err) =
                        write_crash_report(&self.browser, &self.cfg.paths.crash_dir, &e.to_string())
                            .await
                    {
                        tracing::warn!("orchestrator: crash report failed: {report_err}");
                    }
                }
                "failed"
            }
        };

        let entry = self.journal_entry(outcome);
        self.journal.append(entry.clone())?;
        // crash reports are already on disk; now the page can go
        if let Err(e) = self.browser.close().await {
            tracing::debug!("orchestrator: browser close failed: {e}");
        }
        self.signals.finish_run();
        Ok(entry)
    }

    async fn run_inner(&mut self) -> Result<(), AutomationError> {
        self.events.step("authenticating");
        self.authenticate().await?;
        self.check_stop()?;

        self.events.step("selecting manager");
        self.select_manager().await?;

        self.events.step("loading farm list");
        let farms = self.load_farm_list().await?;
        self.events.log_info(format!(
            "{} farm(s) listed for {}",
            farms.len(),
            self.run_cfg.manager
        ));

        let total = farms.len();
        let start_index = self.run_cfg.start_from.saturating_sub(1);
        let mut records: Vec<FarmRecord> = Vec::new();
        let mut processed = 0usize;

        for (i, farm) in farms.iter().enumerate() {
            if i < start_index {
                continue;
            }
            // Re-read the cap every iteration so mid-run increases count.
            if processed >= self.signals.max_farms() {
                self.events
                    .log_info(format!("farm cap reached ({processed}), stopping the loop"));
                break;
            }
            self.check_stop()?;
            self.progress(i, total, &farm.display_name, "navigating");

            match self.process_farm(farm, i, total).await {
                Ok(record) => {
                    self.counters.farms_completed += 1;
                    records.push(record);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // farm-level containment: DOM misses on one farm page
                    self.events
                        .log_error(format!("{}: farm failed: {e}", farm.display_name));
                    records.push(FarmRecord {
                        farm_id: farm.farm_id.clone(),
                        section_id: farm.section_id.clone(),
                        display_name: farm.display_name.clone(),
                        manager: self.run_cfg.manager.clone(),
                        dates: Vec::new(),
                    });
                }
            }
            processed += 1;
            // checkpoint after every farm
            if let Err(e) = self.write_run_output(&records, total) {
                tracing::warn!("orchestrator: checkpoint write failed: {e}");
            }
        }

        self.write_run_output(&records, total)
            .map_err(|e| AutomationError::Network(format!("run output write failed: {e}")))?;
        Ok(())
    }

    /// Login when the site asks for it; a visible form with no
    /// credentials configured, or a post-login confirmation timeout, is
    /// fatal for the run.
    async fn authenticate(&mut self) -> Result<(), AutomationError> {
        let nav = Duration::from_secs(self.cfg.timeouts.navigation_secs);
        with_deadline(nav, self.browser.goto(&self.cfg.site.base_url), "navigation").await?;

        let login_visible = self
            .browser
            .wait_for_selector(
                &self.cfg.site.login_password,
                Duration::from_secs(self.cfg.timeouts.login_ui_secs),
            )
            .await
            .is_ok();
        if !login_visible {
            tracing::info!("orchestrator: no login form, session already active");
            return Ok(());
        }

        let Some(creds) = self.run_cfg.credentials.clone() else {
            return Err(AutomationError::Auth(
                "login form present but no credentials configured".to_string(),
            ));
        };
        self.events.log_info("logging in");
        self.browser
            .fill(&self.cfg.site.login_username, &creds.username)
            .await?;
        self.browser
            .fill(&self.cfg.site.login_password, &creds.password)
            .await?;
        self.browser.click(&self.cfg.site.login_submit).await?;

        self.browser
            .wait_for_selector(
                &self.cfg.site.manager_radio,
                Duration::from_secs(self.cfg.timeouts.post_login_secs),
            )
            .await
            .map_err(|_| {
                AutomationError::Auth("post-login confirmation timed out".to_string())
            })?;
        Ok(())
    }

    /// Click the manager radio whose text matches exactly.
    async fn select_manager(&mut self) -> Result<(), AutomationError> {
        self.check_stop()?;
        let script = format!(
            "(() => {{ const items = Array.from(document.querySelectorAll({sel})); \
             const hit = items.find((el) => el.textContent.trim() === {name}); \
             if (!hit) return false; hit.click(); return true; }})()",
            sel = js_str(&self.cfg.site.manager_radio),
            name = js_str(&self.run_cfg.manager),
        );
        let clicked = self.browser.eval(&script).await?;
        if clicked.as_bool() != Some(true) {
            return Err(AutomationError::DomContract {
                what: format!("manager radio '{}'", self.run_cfg.manager),
                selector: self.cfg.site.manager_radio.clone(),
            });
        }
        tokio::time::sleep(Duration::from_millis(self.cfg.timeouts.settle_ms)).await;
        Ok(())
    }

    async fn load_farm_list(&mut self) -> Result<Vec<FarmLink>, AutomationError> {
        self.browser
            .wait_for_selector(
                &self.cfg.site.farm_links,
                Duration::from_secs(self.cfg.timeouts.navigation_secs),
            )
            .await?;
        let script = format!(
            "(() => Array.from(document.querySelectorAll({sel}))\
             .map((a) => ({{ href: a.getAttribute('href') || '', text: (a.textContent || '').trim() }})))()",
            sel = js_str(&self.cfg.site.farm_links),
        );
        let value = self.browser.eval(&script).await?;
        let raw: Vec<(String, String)> = value
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|item| {
                        (
                            item.get("href")
                                .and_then(serde_json::Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            item.get("text")
                                .and_then(serde_json::Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let farms = filter_farm_anchors(&raw);
        if farms.is_empty() {
            return Err(AutomationError::DomContract {
                what: "farm list".to_string(),
                selector: self.cfg.site.farm_links.clone(),
            });
        }
        Ok(farms)
    }

    async fn process_farm(
        &mut self,
        farm: &FarmLink,
        index: usize,
        total: usize,
    ) -> Result<FarmRecord, AutomationError> {
        let mut record = FarmRecord {
            farm_id: farm.farm_id.clone(),
            section_id: farm.section_id.clone(),
            display_name: farm.display_name.clone(),
            manager: self.run_cfg.manager.clone(),
            dates: Vec::new(),
        };

        if self.signals.mode() == Mode::ReportSending {
            let result = self.process_farm_report(farm).await?;
            self.counters.record_date(&result);
            record.dates.push(result);
            return Ok(record);
        }

        let today = chrono::Local::now().date_naive();
        for date in date_window(today, self.cfg.window.days_back) {
            self.check_stop()?;
            self.progress(index, total, &farm.display_name, &format!("date {date}"));

            let result = match self.process_date(farm, date).await {
                Ok(result) => result,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // per-date containment: every date yields one result
                    self.events
                        .log_error(format!("{} {date}: {e}", farm.display_name));
                    let mut result = DateResult::bare(date, DateStatus::Error);
                    result.note = e.to_string();
                    result
                }
            };
            self.counters.record_date(&result);
            record.dates.push(result);
        }
        Ok(record)
    }

    /// The per-date pipeline: navigate → capture → analyze → decide →
    /// act → verify → record.
    async fn process_date(
        &mut self,
        farm: &FarmLink,
        date: NaiveDate,
    ) -> Result<DateResult, AutomationError> {
        let url = build_date_url(
            &self.cfg.site.base_url,
            &farm.href,
            &self.run_cfg.manager,
            date,
        )?;

        // Arm before navigating so the slot belongs to this date.
        self.interceptor.arm();
        let nav = Duration::from_secs(self.cfg.timeouts.navigation_secs);
        with_deadline(nav, self.browser.goto(&url), "navigation").await?;

        self.wait_for_chart().await?;
        let payload = self
            .interceptor
            .wait_for_capture(
                &self.browser,
                Duration::from_secs(self.cfg.timeouts.capture_secs),
            )
            .await?;

        let series = extract_series(&payload.body, &farm.farm_id, date)?;
        let detection = detect_events(&series);
        tracing::debug!(
            "{} {date}: {} point(s), {} event(s)",
            farm.display_name,
            series.len(),
            detection.events.len()
        );

        let cells = self.inspector.read_time_cells(&self.browser).await?;
        let mut result = DateResult::bare(date, DateStatus::Error);
        result.points_analyzed = series.len();
        result.y_range = series.y_range();

        match decide(&cells, detection.events.len()) {
            DateAction::AlreadyFilled => {
                result.status = DateStatus::AlreadyFilled;
                result.first_time = cells.first_time;
                result.last_time = cells.last_time;
                self.events
                    .log_info(format!("{} {date}: already filled", farm.display_name));
            }
            DateAction::NoIrrigation => {
                result.status = DateStatus::NoIrrigation;
                self.events
                    .log_info(format!("{} {date}: no irrigation detected", farm.display_name));
            }
            DateAction::Click { first, last } => {
                self.act(farm, date, &series, &detection, first, last, &mut result)
                    .await?;
            }
        }

        self.screenshot_trail(farm, date).await;
        Ok(result)
    }

    /// Place the clicks for one date and verify the table took them.
    #[allow(clippy::too_many_arguments)]
    async fn act(
        &mut self,
        farm: &FarmLink,
        date: NaiveDate,
        series: &SensorSeries,
        detection: &Detection,
        need_first: bool,
        need_last: bool,
        result: &mut DateResult,
    ) -> Result<(), AutomationError> {
        self.check_stop()?;

        let (Some(first_event), Some(last_event)) = (detection.first(), detection.last()) else {
            result.status = DateStatus::NoIrrigation;
            return Ok(());
        };

        let mode = self.signals.mode();
        let offsets = if mode == Mode::Learning {
            AveragedOffsets::default()
        } else {
            self.learned_offsets
        };
        let chart = self
            .browser
            .bounding_rect(&self.cfg.site.chart_container)
            .await?;
        let clicker = ChartClicker {
            mode,
            offsets,
            time_inputs: self.cfg.site.time_inputs.clone(),
            settle: Duration::from_millis(self.cfg.timeouts.settle_ms),
            learning_wait: Duration::from_secs(self.cfg.timeouts.learning_wait_secs),
        };

        let outcome = clicker
            .place(
                &self.browser,
                &chart,
                series.len(),
                first_event.peak_index,
                last_event.peak_index,
                need_first,
                need_last,
            )
            .await?;

        match outcome {
            ClickOutcome::PlannedOnly { .. } => {
                result.status = DateStatus::Skipped;
                result.note = "watch mode: planned clicks only".to_string();
                result.first_time = Some(first_event.peak_time.format("%H:%M").to_string());
                result.last_time = Some(last_event.peak_time.format("%H:%M").to_string());
            }
            ClickOutcome::Learning {
                first,
                last,
                decision,
            } => {
                self.append_learning_sample(farm, date, &first, &last, &decision);
                if decision.confirmed {
                    self.counters.charts_clicked +=
                        usize::from(need_first) + usize::from(need_last);
                    self.verify_clicks(&clicker, &chart, series.len(), first_event.peak_index,
                        last_event.peak_index, need_first, need_last, result)
                        .await?;
                } else {
                    result.status = DateStatus::Skipped;
                    result.note = "learning: operator skipped".to_string();
                }
            }
            ClickOutcome::Performed { .. } => {
                self.counters.charts_clicked += usize::from(need_first) + usize::from(need_last);
                self.verify_clicks(&clicker, &chart, series.len(), first_event.peak_index,
                    last_event.peak_index, need_first, need_last, result)
                    .await?;
            }
        }
        Ok(())
    }

    /// Re-read the cells; one retry, then a verification error.
    #[allow(clippy::too_many_arguments)]
    async fn verify_clicks(
        &mut self,
        clicker: &ChartClicker,
        chart: &crate::browser::Rect,
        series_len: usize,
        first_index: usize,
        last_index: usize,
        need_first: bool,
        need_last: bool,
        result: &mut DateResult,
    ) -> Result<(), AutomationError> {
        let verified = |cells: &TimeCells| {
            (!need_first || cells.first_time.is_some())
                && (!need_last || cells.last_time.is_some())
        };

        let mut after = self.inspector.read_time_cells(&self.browser).await?;
        if !verified(&after) {
            tracing::warn!("orchestrator: table still empty after click, retrying once");
            self.check_stop()?;
            // retry without the learning ceremony
            let retry = ChartClicker {
                mode: Mode::Normal,
                offsets: clicker.offsets,
                time_inputs: clicker.time_inputs.clone(),
                settle: clicker.settle,
                learning_wait: clicker.learning_wait,
            };
            retry
                .place(
                    &self.browser,
                    chart,
                    series_len,
                    first_index,
                    last_index,
                    need_first,
                    need_last,
                )
                .await?;
            after = self.inspector.read_time_cells(&self.browser).await?;
            if !verified(&after) {
                return Err(AutomationError::ClickVerification(
                    "table still empty after click retry".to_string(),
                ));
            }
        }

        result.status = DateStatus::Filled;
        result.first_time = after.first_time;
        result.last_time = after.last_time;
        Ok(())
    }

    /// Report-sending mode: validate the summary table, then press the
    /// report button only when all four preconditions hold.
    async fn process_farm_report(
        &mut self,
        farm: &FarmLink,
    ) -> Result<DateResult, AutomationError> {
        let today = chrono::Local::now().date_naive();
        let url = build_date_url(
            &self.cfg.site.base_url,
            &farm.href,
            &self.run_cfg.manager,
            today,
        )?;
        let nav = Duration::from_secs(self.cfg.timeouts.navigation_secs);
        with_deadline(nav, self.browser.goto(&url), "navigation").await?;
        tokio::time::sleep(Duration::from_millis(self.cfg.timeouts.settle_ms)).await;

        let row = self.inspector.read_report_row(&self.browser).await?;
        let check = validate_report_row(&row, &self.inspector.labels);
        let mut result = DateResult::bare(today, DateStatus::Skipped);

        if !check.ok() {
            result.note = check.reason();
            self.events.send(Envelope::ReportUpdate {
                farm: farm.display_name.clone(),
                status: "skipped".to_string(),
                reason: result.note.clone(),
            });
            return Ok(result);
        }

        self.check_stop()?;
        let script = format!(
            "(() => {{ const btns = Array.from(document.querySelectorAll('button')); \
             const hit = btns.find((b) => (b.textContent || '').includes({text})); \
             if (!hit || hit.disabled) return false; hit.click(); return true; }})()",
            text = js_str(&self.cfg.site.report_button_text),
        );
        let clicked = self.browser.eval(&script).await?;
        if clicked.as_bool() == Some(true) {
            self.counters.reports_created += 1;
            result.status = DateStatus::Filled;
            result.note = "report created".to_string();
            self.events.send(Envelope::ReportUpdate {
                farm: farm.display_name.clone(),
                status: "sent".to_string(),
                reason: String::new(),
            });
        } else {
            result.status = DateStatus::Error;
            result.note = "report button not found or disabled".to_string();
        }
        Ok(result)
    }

    /// Active poll for a rendered chart series; passive sleeps miss slow
    /// loads and overshoot fast ones.
    async fn wait_for_chart(&self) -> Result<(), AutomationError> {
        let script = format!(
            "(() => {{ const c = document.querySelector({sel}); if (!c) return false; \
             return c.querySelectorAll('.highcharts-series path, .highcharts-point').length > 0; }})()",
            sel = js_str(&self.cfg.site.chart_container),
        );
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.cfg.timeouts.chart_render_secs);
        loop {
            if self.browser.eval(&script).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AutomationError::Network(format!(
                    "chart did not render within {}s",
                    self.cfg.timeouts.chart_render_secs
                )));
            }
            tokio::time::sleep(Duration::from_millis(CHART_POLL_MS)).await;
        }
    }

    fn append_learning_sample(
        &self,
        farm: &FarmLink,
        date: NaiveDate,
        first: &PlannedClick,
        last: &PlannedClick,
        decision: &crate::clicker::LearningDecision,
    ) {
        let algorithm = SlotPair {
            first: Some(ClickPoint {
                x: first.x,
                y: first.y,
            }),
            last: Some(ClickPoint {
                x: last.x,
                y: last.y,
            }),
        };
        let user = SlotPair {
            first: decision.user_first,
            last: decision.user_last,
        };
        let corrected = user.first.is_some() || user.last.is_some();
        let sample = LearningSample {
            timestamp: Utc::now().to_rfc3339(),
            farm: farm.farm_id.clone(),
            date,
            offsets: LearningSample::compute_offsets(&algorithm, &user),
            algorithm_detection: algorithm,
            user_corrections: corrected.then_some(user),
            feedback: if decision.confirmed {
                "confirmed".to_string()
            } else {
                "skipped".to_string()
            },
        };
        if let Err(e) = self.learning.append(sample) {
            tracing::warn!("orchestrator: learning sample not persisted: {e}");
        }
    }

    /// Best-effort per-date screenshot for the dashboard trail.
    async fn screenshot_trail(&self, farm: &FarmLink, date: NaiveDate) {
        let png = match self.browser.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                tracing::debug!("orchestrator: screenshot failed: {e}");
                return;
            }
        };
        let name = format!("{}-{}-{date}.png", farm.farm_id, farm.section_id);
        let path = self.cfg.paths.screenshots_dir.join(&name);
        if let Err(e) = std::fs::write(&path, png) {
            tracing::debug!("orchestrator: screenshot write failed: {e}");
            return;
        }
        self.events.send(Envelope::Screenshot {
            path: path.to_string_lossy().into_owned(),
            label: format!("{} {date}", farm.display_name),
        });
    }

    fn progress(&self, farm_index: usize, total_farms: usize, farm_name: &str, step: &str) {
        let percent = if total_farms == 0 {
            0.0
        } else {
            (farm_index as f64 / total_farms as f64) * 100.0
        };
        self.events.progress(&ProgressSnapshot {
            farm_index: farm_index + 1,
            total_farms,
            farm_name: farm_name.to_string(),
            step: step.to_string(),
            percent,
        });
    }

    fn check_stop(&self) -> Result<(), AutomationError> {
        if self.signals.should_stop() {
            return Err(AutomationError::OperatorAbort);
        }
        Ok(())
    }

    fn write_run_output(&self, records: &[FarmRecord], total_farms: usize) -> anyhow::Result<()> {
        let has_time = |r: &FarmRecord| {
            r.dates
                .iter()
                .any(|d| d.first_time.is_some() || d.last_time.is_some())
        };
        let output = RunOutput {
            extracted_at: self.started_at.to_rfc3339(),
            manager: self.run_cfg.manager.clone(),
            date_range: DateRangeInfo {
                description: format!("last {} day(s)", self.cfg.window.days_back + 1),
                total_days: self.cfg.window.days_back as usize + 1,
            },
            total_farms,
            farms_with_data: records.iter().filter(|r| has_time(r)).count(),
            total_dates_processed: self.counters.dates_processed,
            total_dates_with_data: records
                .iter()
                .flat_map(|r| &r.dates)
                .filter(|d| d.first_time.is_some() || d.last_time.is_some())
                .count(),
            farms: records.to_vec(),
        };
        let tmp = self.output_path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&output)?)?;
        std::fs::rename(&tmp, &self.output_path)?;
        Ok(())
    }

    fn journal_entry(&self, outcome: &str) -> RunJournalEntry {
        let ended_at = Utc::now();
        RunJournalEntry {
            run_id: self.run_id.clone(),
            started_at: self.started_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ended_at: ended_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            duration_secs: (ended_at - self.started_at).num_seconds(),
            manager: self.run_cfg.manager.clone(),
            mode: self.run_cfg.mode.as_str().to_string(),
            requested_farms: self.signals.max_farms(),
            farms_completed: self.counters.farms_completed,
            dates_processed: self.counters.dates_processed,
            charts_clicked: self.counters.charts_clicked,
            success: self.counters.success,
            skip: self.counters.skip,
            error: self.counters.error,
            no_irrigation: self.counters.no_irrigation,
            reports_created: self.counters.reports_created,
            date_range: self.counters.date_range(),
            outcome: outcome.to_string(),
        }
    }
}

/// Oldest to newest: T−days_back through T−0.
pub fn date_window(today: NaiveDate, days_back: u32) -> Vec<NaiveDate> {
    (0..=i64::from(days_back))
        .rev()
        .map(|d| today - chrono::Duration::days(d))
        .collect()
}

/// Rebuild a farm href into a dated navigation URL. The manager query
/// parameter is always overwritten from the run config, never
/// concatenated, so a stale href cannot smuggle another manager in.
pub fn build_date_url(
    base: &str,
    href: &str,
    manager: &str,
    date: NaiveDate,
) -> Result<String, AutomationError> {
    let base_url = Url::parse(base)
        .map_err(|e| AutomationError::Network(format!("bad base url {base}: {e}")))?;
    let mut url = base_url
        .join(href)
        .map_err(|e| AutomationError::Network(format!("bad farm href {href}: {e}")))?;

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "manager" && k != "date")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.set_query(None);
    {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in &retained {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("manager", manager);
        pairs.append_pair("date", &date.format("%Y-%m-%d").to_string());
    }
    Ok(url.to_string())
}

/// Keep only real farm anchors: href shaped `/report/point/<id>/<section>`
/// and a display text that is not a date, a button caption or a chart
/// legend.
pub fn filter_farm_anchors(raw: &[(String, String)]) -> Vec<FarmLink> {
    let href_re = Regex::new(r"/report/point/(\d+)/(\d+)").unwrap();
    let date_re = Regex::new(r"\d{4}[-./]\d{1,2}[-./]\d{1,2}").unwrap();

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut farms = Vec::new();
    for (href, text) in raw {
        let Some(caps) = href_re.captures(href) else {
            continue;
        };
        let text = text.trim();
        let chars = text.chars().count();
        if !(3..=200).contains(&chars) {
            continue;
        }
        if date_re.is_match(text) {
            continue;
        }
        if EXCLUDED_TEXTS.contains(&text) || LEGEND_TEXTS.contains(&text) {
            continue;
        }
        let farm_id = caps[1].to_string();
        let section_id = caps[2].to_string();
        if !seen.insert((farm_id.clone(), section_id.clone())) {
            continue;
        }
        farms.push(FarmLink {
            farm_id,
            section_id,
            display_name: text.to_string(),
            href: href.clone(),
        });
    }
    farms
}

/// Wrap a browser future in a hard deadline.
async fn with_deadline<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, AutomationError>>,
    what: &str,
) -> Result<T, AutomationError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AutomationError::Network(format!(
            "{what} timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::browser::TappedResponse;
    use crate::config::SiteConfig;
    use serde_json::json;

    fn test_cfg(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.paths.training_dir = dir.join("training");
        cfg.paths.history_dir = dir.join("history");
        cfg.paths.data_dir = dir.join("data");
        cfg.paths.screenshots_dir = dir.join("screenshots");
        cfg.paths.crash_dir = dir.join("crash-reports");
        cfg.paths.init_dirs().unwrap();
        cfg.timeouts.settle_ms = 0;
        cfg.timeouts.capture_secs = 0;
        cfg.timeouts.chart_render_secs = 0;
        cfg.timeouts.learning_wait_secs = 0;
        cfg
    }

    fn run_config(mode: Mode) -> RunConfig {
        RunConfig {
            manager: "김태우".to_string(),
            mode,
            start_from: 0,
            max_farms: 50,
            credentials: None,
        }
    }

    fn orchestrator(
        browser: FakeBrowser,
        dir: &std::path::Path,
        mode: Mode,
    ) -> Orchestrator<FakeBrowser> {
        let cfg = test_cfg(dir);
        let signals = Arc::new(ControlSignals::new());
        assert!(signals.request_start(run_config(mode)));
        let journal = Arc::new(RunJournal::open(cfg.paths.journal_file()).unwrap());
        let learning = Arc::new(LearningStore::open(cfg.paths.training_file()).unwrap());
        Orchestrator::new(
            browser,
            cfg,
            run_config(mode),
            signals,
            Broadcaster::new(64),
            journal,
            learning,
        )
    }

    fn farm() -> FarmLink {
        FarmLink {
            farm_id: "1001".to_string(),
            section_id: "2".to_string(),
            display_name: "성주 딸기농장 A동".to_string(),
            href: "/report/point/1001/2".to_string(),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 6).unwrap()
    }

    /// Sensor rows with one clean daytime surge (valley ~10:00).
    fn rising_payload() -> TappedResponse {
        let rows: Vec<serde_json::Value> = (0..1440)
            .map(|i| {
                let y = if i < 600 {
                    12.52 - 0.02 * (i as f64 / 600.0)
                } else if i <= 720 {
                    12.5 + 0.0125 * (i - 600) as f64
                } else {
                    14.0 - (1.2 / 720.0) * (i - 720) as f64
                };
                json!({ "slabwgt_1": y })
            })
            .collect();
        TappedResponse {
            kind: "fetch".to_string(),
            url: "https://x/api/series".to_string(),
            status: 200,
            content_type: "application/json".to_string(),
            body: json!({ "node.a1": rows }).to_string(),
        }
    }

    fn empty_cells() -> serde_json::Value {
        json!({ "first": "-", "last": "--:--" })
    }

    #[test]
    fn date_window_runs_oldest_to_newest() {
        let window = date_window(date(), 5);
        assert_eq!(window.len(), 6);
        assert_eq!(window[0], NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert_eq!(window[5], date());
        for pair in window.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn build_date_url_enforces_the_configured_manager() {
        let url = build_date_url(
            "https://dash.example.io",
            "/report/point/1001/2?manager=someone&zoom=3",
            "김태우",
            date(),
        )
        .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let managers: Vec<String> = parsed
            .query_pairs()
            .filter(|(k, _)| k == "manager")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(managers, vec!["김태우".to_string()]);
        let dates: Vec<String> = parsed
            .query_pairs()
            .filter(|(k, _)| k == "date")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(dates, vec!["2026-01-06".to_string()]);
        assert!(parsed.query_pairs().any(|(k, v)| k == "zoom" && v == "3"));
    }

    #[test]
    fn farm_anchor_filtering() {
        let raw = vec![
            ("/report/point/1001/2".to_string(), "성주 딸기농장 A동".to_string()),
            ("/report".to_string(), "컨테이너 링크".to_string()),
            ("/report/point/1002/1".to_string(), "전체 보기".to_string()),
            ("/report/point/1003/1".to_string(), "저장".to_string()),
            ("/report/point/1004/1".to_string(), "2026-01-06".to_string()),
            ("/report/point/1005/1".to_string(), "함수율".to_string()),
            ("/report/point/1006/1".to_string(), "농".to_string()),
            ("/report/point/1001/2?x=1".to_string(), "성주 딸기농장 A동 중복".to_string()),
            ("/report/point/1007/3".to_string(), "김해 토마토 2구역".to_string()),
        ];
        let farms = filter_farm_anchors(&raw);
        assert_eq!(farms.len(), 2);
        assert_eq!(farms[0].farm_id, "1001");
        assert_eq!(farms[0].section_id, "2");
        assert_eq!(farms[1].farm_id, "1007");
    }

    #[tokio::test]
    async fn s5_already_filled_issues_no_clicks() {
        let browser = FakeBrowser::new();
        browser.stub_eval("highcharts", json!(true));
        browser.stub_eval(
            "구역 1 첫 급액 시간 1 (시분)",
            json!({ "first": "08:15", "last": "15:42" }),
        );
        browser.push_tap_response(rising_payload());

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(browser, dir.path(), Mode::Normal);
        let result = orch.process_date(&farm(), date()).await.unwrap();

        assert_eq!(result.status, DateStatus::AlreadyFilled);
        assert_eq!(result.first_time.as_deref(), Some("08:15"));
        assert_eq!(result.last_time.as_deref(), Some("15:42"));
        assert!(orch.browser.coordinate_clicks().is_empty());
        assert_eq!(orch.counters.charts_clicked, 0);
    }

    #[tokio::test]
    async fn empty_table_with_events_clicks_and_verifies() {
        let browser = FakeBrowser::new();
        browser.stub_eval("highcharts", json!(true));
        browser.stub_eval_seq(
            "구역 1 첫 급액 시간 1 (시분)",
            vec![
                empty_cells(),
                json!({ "first": "09:58", "last": "09:58" }),
            ],
        );
        browser.stub_eval("inputs[0]", json!(true));
        browser.stub_eval("inputs[1]", json!(true));
        browser.push_tap_response(rising_payload());

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(browser, dir.path(), Mode::Normal);
        let result = orch.process_date(&farm(), date()).await.unwrap();

        assert_eq!(result.status, DateStatus::Filled);
        assert_eq!(result.first_time.as_deref(), Some("09:58"));
        assert_eq!(orch.counters.charts_clicked, 2);
        assert_eq!(orch.browser.coordinate_clicks().len(), 2);
        // navigation carried the enforced manager and the date
        let visited = orch.browser.visited();
        assert!(visited[0].contains("manager="));
        assert!(visited[0].contains("date=2026-01-06"));
    }

    #[tokio::test]
    async fn capture_timeout_is_a_date_local_error() {
        let browser = FakeBrowser::new();
        browser.stub_eval("highcharts", json!(true));
        // no tap payload pushed

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(browser, dir.path(), Mode::Normal);
        let err = orch.process_date(&farm(), date()).await.unwrap_err();
        assert!(matches!(err, AutomationError::CaptureTimeout(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn failed_verification_retries_once_then_errors() {
        let browser = FakeBrowser::new();
        browser.stub_eval("highcharts", json!(true));
        // cells stay empty through decide, verify, and the retry verify
        browser.stub_eval("구역 1 첫 급액 시간 1 (시분)", empty_cells());
        browser.stub_eval("inputs[0]", json!(true));
        browser.stub_eval("inputs[1]", json!(true));
        browser.push_tap_response(rising_payload());

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(browser, dir.path(), Mode::Normal);
        let err = orch.process_date(&farm(), date()).await.unwrap_err();
        assert!(matches!(err, AutomationError::ClickVerification(_)));
        // first attempt plus one retry
        assert_eq!(orch.browser.coordinate_clicks().len(), 4);
    }

    #[tokio::test]
    async fn stop_flag_aborts_with_a_single_stopped_journal_entry() {
        let browser = FakeBrowser::new();
        browser
            .state
            .lock()
            .unwrap()
            .missing_selectors
            .push(SiteConfig::default().login_password);

        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(browser, dir.path(), Mode::Normal);
        let journal = orch.journal.clone();
        orch.signals.request_stop();

        let entry = orch.run().await.unwrap();
        assert_eq!(entry.outcome, "stopped");
        assert_eq!(entry.charts_clicked, 0);
        assert_eq!(journal.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn auth_failure_fails_the_run_and_writes_a_crash_report() {
        // default fake: every selector "appears", so the login form is
        // visible and there are no credentials to fill it with
        let browser = FakeBrowser::new();
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(browser, dir.path(), Mode::Normal);
        let journal = orch.journal.clone();

        let entry = orch.run().await.unwrap();
        assert_eq!(entry.outcome, "failed");
        assert_eq!(journal.list().unwrap().len(), 1);

        let crash_root = dir.path().join("crash-reports");
        let reports: Vec<_> = std::fs::read_dir(&crash_root).unwrap().collect();
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn report_sending_clicks_the_button_when_the_table_validates() {
        let browser = FakeBrowser::new();
        browser.stub_eval(
            "야간 함수율 편차",
            json!({
                "night_deviation": "-",
                "last_feed": "-",
                "first_feed": "08:15",
                "sunrise": "07:21"
            }),
        );
        browser.stub_eval("리포트 생성", json!(true));

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(browser, dir.path(), Mode::ReportSending);
        let record = orch.process_farm(&farm(), 0, 1).await.unwrap();

        assert_eq!(record.dates.len(), 1);
        assert_eq!(record.dates[0].status, DateStatus::Filled);
        assert_eq!(orch.counters.reports_created, 1);
    }

    #[tokio::test]
    async fn report_sending_skips_with_the_violated_label_in_the_reason() {
        let browser = FakeBrowser::new();
        browser.stub_eval(
            "야간 함수율 편차",
            json!({
                "night_deviation": "0.02",
                "last_feed": "-",
                "first_feed": "08:15",
                "sunrise": "07:21"
            }),
        );

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(browser, dir.path(), Mode::ReportSending);
        let record = orch.process_farm(&farm(), 0, 1).await.unwrap();

        assert_eq!(record.dates[0].status, DateStatus::Skipped);
        assert!(record.dates[0].note.contains("야간 함수율 편차 must be \"-\""));
        assert_eq!(orch.counters.reports_created, 0);
    }

    #[tokio::test]
    async fn learning_skip_records_a_sample_without_filling() {
        let browser = FakeBrowser::new();
        browser.stub_eval("highcharts", json!(true));
        browser.stub_eval("구역 1 첫 급액 시간 1 (시분)", empty_cells());
        browser.stub_eval(
            "__irrigoLearn ||",
            json!({ "decision": "skip", "clicks": [ { "x": 810.0, "y": 420.0 } ] }),
        );
        browser.push_tap_response(rising_payload());

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(browser, dir.path(), Mode::Learning);
        let result = orch.process_date(&farm(), date()).await.unwrap();

        assert_eq!(result.status, DateStatus::Skipped);
        assert!(orch.browser.coordinate_clicks().is_empty());

        let samples = orch.learning.load().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].feedback, "skipped");
        assert!(samples[0].user_corrections.is_some());
        assert!(samples[0].offsets.is_some());
    }
}
