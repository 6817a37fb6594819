//! Crash-report directories: `crash-reports/<iso>/` holding a page
//! screenshot, the DOM snapshot, the failure reason and a timestamp.
//! Written before browser resources are released.

use std::path::{Path, PathBuf};

use crate::browser::Browser;

pub async fn write_crash_report(
    browser: &dyn Browser,
    root: &Path,
    reason: &str,
) -> anyhow::Result<PathBuf> {
    let now = chrono::Utc::now();
    let dir = root.join(now.format("%Y-%m-%dT%H-%M-%SZ").to_string());
    std::fs::create_dir_all(&dir)?;

    // Best-effort: a dead page must not prevent the report itself.
    match browser.screenshot().await {
        Ok(png) => std::fs::write(dir.join("screenshot.png"), png)?,
        Err(e) => tracing::warn!("crash report: screenshot failed: {e}"),
    }
    match browser.page_source().await {
        Ok(html) => std::fs::write(dir.join("dom.html"), html)?,
        Err(e) => tracing::warn!("crash report: dom snapshot failed: {e}"),
    }
    std::fs::write(dir.join("reason.txt"), reason)?;
    std::fs::write(dir.join("timestamp.txt"), now.to_rfc3339())?;

    tracing::error!("crash report written to {}", dir.display());
    Ok(dir)
}
