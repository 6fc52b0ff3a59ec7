use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::StageKind;
use crate::config::ReviewConfig;

/// Record of one end-to-end pipeline execution.
///
/// Persisted alongside the store so a later audit can reproduce why a
/// document reached its terminal status. The run record itself never
/// mutates after creation; all progress lives in the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// The PICO(S) question and thresholds in effect for this run
    pub config_snapshot: ReviewConfig,
    pub stage_sequence: Vec<StageKind>,
}

impl PipelineRun {
    pub fn new(config: &ReviewConfig, sequence: &[StageKind]) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            config_snapshot: config.clone(),
            stage_sequence: sequence.to_vec(),
        }
    }

    /// Write the run record to `<runs_dir>/<run_id>.json`
    pub fn write_json(&self, runs_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(runs_dir)
            .with_context(|| format!("Failed to create runs directory: {:?}", runs_dir))?;
        let path = runs_dir.join(format!("{}.json", self.run_id));
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create run record: {:?}", path))?;
        serde_json::to_writer_pretty(file, self).context("Failed to write run record")?;
        Ok(path)
    }
}

/// Per-stage completion counts reported after each stage
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub in_progress: usize,
}

impl StageSummary {
    /// Documents that reached a terminal status for this stage
    pub fn terminal(&self) -> usize {
        self.done + self.failed + self.skipped
    }
}

/// Summary of a whole run, one entry per executed stage
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub stages: Vec<StageSummary>,
    /// Total documents in the store when the run finished
    pub total_documents: usize,
}

impl RunSummary {
    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == name)
    }
}
