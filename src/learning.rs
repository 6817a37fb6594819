//! Training-data persistence and averaged correction offsets.
//!
//! One JSON array on disk, append-only. Writes go through a temp file
//! and a rename so a crash mid-write never corrupts earlier samples.

use std::path::{Path, PathBuf};

use crate::models::{AveragedOffsets, ClickPoint, LearningSample};

pub struct LearningStore {
    path: PathBuf,
}

impl LearningStore {
    /// Open (and create if absent) the store at `path`.
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

    pub fn load(&self) -> anyhow::Result<Vec<LearningSample>> {
        let contents = std::fs::read_to_string(&self.path)?;
        let samples = serde_json::from_str(&contents)?;
        Ok(samples)
    }

    pub fn append(&self, sample: LearningSample) -> anyhow::Result<()> {
        let mut samples = self.load()?;
        samples.push(sample);
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&samples)?)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!("learning: {} sample(s) persisted", samples.len());
        Ok(())
    }

    /// Mean (Δx, Δy) over all samples carrying a user correction,
    /// separately for the first and last slots.
    pub fn averaged_offsets(&self) -> anyhow::Result<AveragedOffsets> {
        let samples = self.load()?;
        let mut first_sum = (0.0_f64, 0.0_f64, 0usize);
        let mut last_sum = (0.0_f64, 0.0_f64, 0usize);
        let mut corrected = 0usize;

        for sample in &samples {
            let Some(offsets) = &sample.offsets else {
                continue;
            };
            corrected += 1;
            if let Some(o) = offsets.first {
                first_sum = (first_sum.0 + o.x, first_sum.1 + o.y, first_sum.2 + 1);
            }
            if let Some(o) = offsets.last {
                last_sum = (last_sum.0 + o.x, last_sum.1 + o.y, last_sum.2 + 1);
            }
        }

        let mean = |sum: (f64, f64, usize)| {
            (sum.2 > 0).then(|| ClickPoint {
                x: sum.0 / sum.2 as f64,
                y: sum.1 / sum.2 as f64,
            })
        };

        Ok(AveragedOffsets {
            first: mean(first_sum),
            last: mean(last_sum),
            samples: corrected,
        })
    }
}
