//! Control flags shared between the HTTP server and the orchestrator.
//!
//! The server writes, the orchestrator reads at its yield points
//! (between farms, between dates, before every mutating page action).
//! Inbound flags are last-write-wins; release/acquire ordering is enough
//! because nothing else hangs off them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::{Mode, RunConfig};

const START_POLL_MS: u64 = 500;

pub struct ControlSignals {
    started: AtomicBool,
    should_stop: AtomicBool,
    max_farms: AtomicUsize,
    mode: Mutex<Mode>,
    config: Mutex<Option<RunConfig>>,
}

impl ControlSignals {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            should_stop: AtomicBool::new(false),
            max_farms: AtomicUsize::new(0),
            mode: Mutex::new(Mode::Normal),
            config: Mutex::new(None),
        }
    }

    /// Accept an operator configuration and flip `started`. Returns false
    /// (and changes nothing) when a run is already in flight.
    pub fn request_start(&self, config: RunConfig) -> bool {
        let mut slot = self.config.lock().unwrap();
        if self.started.load(Ordering::Acquire) {
            return false;
        }
        self.max_farms.store(config.max_farms, Ordering::Release);
        *self.mode.lock().unwrap() = config.mode;
        *slot = Some(config);
        self.should_stop.store(false, Ordering::Release);
        self.started.store(true, Ordering::Release);
        true
    }

    pub fn request_stop(&self) {
        self.should_stop.store(true, Ordering::Release);
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> Mode {
        *self.mode.lock().unwrap()
    }

    /// Live mode switch from the control plane.
    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn max_farms(&self) -> usize {
        self.max_farms.load(Ordering::Acquire)
    }

    /// Atomically raise the farm cap mid-run; returns the new value.
    pub fn add_farms(&self, count: usize) -> usize {
        self.max_farms.fetch_add(count, Ordering::AcqRel) + count
    }

    pub fn config_snapshot(&self) -> Option<RunConfig> {
        self.config.lock().unwrap().clone()
    }

    /// Block until an operator pressed Start. No timeout by design; the
    /// process idles until configured.
    pub async fn wait_until_started(&self) -> RunConfig {
        loop {
            if self.started() {
                if let Some(cfg) = self.config_snapshot() {
                    return cfg;
                }
            }
            tokio::time::sleep(Duration::from_millis(START_POLL_MS)).await;
        }
    }

    /// Clear run state so the next Start is accepted.
    pub fn finish_run(&self) {
        self.started.store(false, Ordering::Release);
        self.should_stop.store(false, Ordering::Release);
        *self.config.lock().unwrap() = None;
    }
}

impl Default for ControlSignals {
    fn default() -> Self {
        Self::new()
    }
}
