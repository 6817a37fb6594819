use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use irrigo::browser::WebDriverBrowser;
use irrigo::config::AppConfig;
use irrigo::events::Broadcaster;
use irrigo::journal::RunJournal;
use irrigo::learning::LearningStore;
use irrigo::models::{Mode, RunConfig};
use irrigo::orchestrator::Orchestrator;
use irrigo::signals::ControlSignals;
use irrigo::{server, AppState};

#[derive(Parser, Debug)]
#[command(
    name = "irrigo",
    about = "Irrigation-time auto-fill for the soil-moisture dashboard",
    version
)]
struct Args {
    /// Start a run for this manager immediately instead of waiting for
    /// the dashboard Start button.
    #[arg(long)]
    manager: Option<String>,

    /// Farm cap for a CLI-started run.
    #[arg(long, default_value_t = 200)]
    max_farms: usize,

    /// Run the browser headless (env HEADLESS=true does the same).
    #[arg(long)]
    headless: bool,

    /// Config file.
    #[arg(long, default_value = "irrigo.toml")]
    config: std::path::PathBuf,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "true" || v == "1")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("irrigo=debug,tower_http=debug")
        }))
        .init();

    let args = Args::parse();
    let mut cfg = AppConfig::load(&args.config)?;
    if args.headless || env_flag("HEADLESS") {
        cfg.webdriver.headless = true;
    }
    cfg.paths.init_dirs()?;

    let signals = Arc::new(ControlSignals::new());
    let broadcaster = Broadcaster::new(256);
    let journal = Arc::new(RunJournal::open(cfg.paths.journal_file())?);
    let learning = Arc::new(LearningStore::open(cfg.paths.training_file())?);

    let state = AppState {
        signals: signals.clone(),
        broadcaster: broadcaster.clone(),
        journal: journal.clone(),
        learning: learning.clone(),
        paths: cfg.paths.clone(),
    };
    let host = cfg.server.host.clone();
    let port = cfg.server.port;
    tokio::spawn(async move {
        if let Err(e) = server::serve(state, &host, port).await {
            tracing::error!("control plane exited: {e}");
        }
    });

    // CLI-configured runs skip the dashboard and exit when done.
    let one_shot = args.manager.is_some();
    if let Some(manager) = args.manager.clone() {
        let mode = if env_flag("TRAINING_MODE") {
            Mode::Learning
        } else {
            Mode::Normal
        };
        signals.request_start(RunConfig {
            manager,
            mode,
            start_from: 0,
            max_farms: args.max_farms,
            credentials: None,
        });
    }

    loop {
        let run_cfg = signals.wait_until_started().await;
        tracing::info!(
            "run accepted for {} (mode {})",
            run_cfg.manager,
            run_cfg.mode.as_str()
        );

        let browser =
            match WebDriverBrowser::connect(&cfg.webdriver.url, cfg.webdriver.headless).await {
                Ok(browser) => browser,
                Err(e) => {
                    tracing::error!("browser connect failed: {e}");
                    broadcaster.status("error", format!("browser connect failed: {e}"));
                    signals.finish_run();
                    if one_shot {
                        return Err(e);
                    }
                    continue;
                }
            };

        let orchestrator = Orchestrator::new(
            browser,
            cfg.clone(),
            run_cfg,
            signals.clone(),
            broadcaster.clone(),
            journal.clone(),
            learning.clone(),
        );
        match orchestrator.run().await {
            Ok(entry) => {
                tracing::info!("run {} finished: {}", entry.run_id, entry.outcome);
            }
            Err(e) => tracing::error!("run bookkeeping failed: {e}"),
        }

        if one_shot {
            break;
        }
    }
    Ok(())
}
