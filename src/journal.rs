//! Append-only run journal (`history/run_logs.json`). One entry per run,
//! immutable once appended.

use std::path::{Path, PathBuf};

use crate::models::RunJournalEntry;

pub struct RunJournal {
    path: PathBuf,
}

impl RunJournal {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            std::fs::write(&path, "[]")?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> anyhow::Result<Vec<RunJournalEntry>> {
        let contents = std::fs::read_to_string(&self.path)?;
        let entries = serde_json::from_str(&contents)?;
        Ok(entries)
    }

    pub fn append(&self, entry: RunJournalEntry) -> anyhow::Result<()> {
        let mut entries = self.list()?;
        tracing::info!(
            "journal: run {} ended ({}) — {} farm(s), {} date(s)",
            entry.run_id,
            entry.outcome,
            entry.farms_completed,
            entry.dates_processed
        );
        entries.push(entry);
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
