use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::config::ReviewConfig;
use crate::models::{Artifact, RunSummary, ScreeningDecision, StageKind};
use crate::store::DocumentStore;

/// PRISMA flow counts derived from store state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrismaCounts {
    /// Records identified by the search
    pub identified: usize,
    /// Records screened on title/abstract
    pub screened: usize,
    /// Records excluded at screening
    pub excluded: usize,
    /// Reports sought for retrieval
    pub sought: usize,
    /// Reports that could not be retrieved
    pub not_retrieved: usize,
    /// Reports retrieved for eligibility assessment
    pub retrieved: usize,
}

impl PrismaCounts {
    pub fn from_store(store: &DocumentStore) -> Self {
        let documents = store.documents();
        let identified = documents.len();
        let mut screened = 0;
        let mut excluded = 0;
        let mut retrieved = 0;

        for doc in &documents {
            if doc.screening_decision().is_some() {
                screened += 1;
            }
            if doc.screening_decision() == Some(ScreeningDecision::Exclude) {
                excluded += 1;
            }
            if matches!(doc.artifact(StageKind::Download), Some(Artifact::PdfFile { .. })) {
                retrieved += 1;
            }
        }

        let sought = screened - excluded;
        Self {
            identified,
            screened,
            excluded,
            sought,
            not_retrieved: sought.saturating_sub(retrieved),
            retrieved,
        }
    }

    /// Mermaid flow diagram in PRISMA shape
    pub fn to_mermaid(&self) -> String {
        format!(
            "```mermaid\n\
             graph TD\n    \
             A[Identification<br/>Records identified<br/>(n = {})] --> B[Records screened<br/>(n = {})]\n    \
             B --> C[Records excluded<br/>(n = {})]\n    \
             B --> D[Reports sought for retrieval<br/>(n = {})]\n    \
             D --> E[Reports not retrieved<br/>(n = {})]\n    \
             D --> F[Reports retrieved for eligibility<br/>(n = {})]\n    \
             F --> G[Studies included in review<br/>(n = {})]\n\
             ```\n",
            self.identified,
            self.screened,
            self.excluded,
            self.sought,
            self.not_retrieved,
            self.retrieved,
            self.retrieved,
        )
    }
}

/// Write the run report as markdown: PICO question, PRISMA flow, per-stage
/// statistics, and the extracted-data and risk-of-bias tables.
pub fn write_report(
    path: &Path,
    config: &ReviewConfig,
    store: &DocumentStore,
    summary: &RunSummary,
) -> Result<PathBuf> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report: {:?}", path))?;
    let prisma = PrismaCounts::from_store(store);

    writeln!(file, "# Systematic Review Report")?;
    writeln!(file, "**Date:** {}\n", Utc::now().format("%Y-%m-%d %H:%M"))?;

    writeln!(file, "## 1. Research Question (PICO)")?;
    for (label, value) in [
        ("Population", &config.picos.population),
        ("Intervention", &config.picos.intervention),
        ("Comparison", &config.picos.comparison),
        ("Outcome", &config.picos.outcome),
        ("Study design", &config.picos.study_design),
    ] {
        if let Some(value) = value {
            writeln!(file, "- **{label}:** {value}")?;
        }
    }
    writeln!(file)?;

    writeln!(file, "## 2. PRISMA Flow Diagram")?;
    writeln!(file, "{}", prisma.to_mermaid())?;

    writeln!(file, "## 3. Stage Statistics")?;
    writeln!(file, "| Stage | Done | Failed | Skipped | Pending |")?;
    writeln!(file, "|-------|------|--------|---------|---------|")?;
    for stage in &summary.stages {
        writeln!(
            file,
            "| {} | {} | {} | {} | {} |",
            stage.stage, stage.done, stage.failed, stage.skipped, stage.pending
        )?;
    }
    writeln!(file)?;

    let documents = store.documents();

    writeln!(file, "## 4. Extracted Data Summary")?;
    let extracted: Vec<_> = documents
        .iter()
        .filter_map(|doc| match doc.artifact(StageKind::Extract) {
            Some(Artifact::Extraction { record }) => Some((doc, record)),
            _ => None,
        })
        .collect();
    if extracted.is_empty() {
        writeln!(file, "No data extraction results found.\n")?;
    } else {
        writeln!(file, "Total extracted studies: {}\n", extracted.len())?;
        writeln!(file, "| Id | Title | Extracted record |")?;
        writeln!(file, "|----|-------|------------------|")?;
        for (doc, record) in &extracted {
            writeln!(
                file,
                "| {} | {} | `{}` |",
                doc.id,
                doc.metadata.title.as_deref().unwrap_or("-"),
                record
            )?;
        }
        writeln!(file)?;
    }

    writeln!(file, "## 5. Risk of Bias Assessment")?;
    let assessed: Vec<_> = documents
        .iter()
        .filter_map(|doc| match doc.artifact(StageKind::AssessBias) {
            Some(Artifact::BiasAssessment { domains }) => Some((doc, domains)),
            _ => None,
        })
        .collect();
    if assessed.is_empty() {
        writeln!(file, "No risk of bias assessment available.")?;
    } else {
        writeln!(file, "Assessed {} studies.\n", assessed.len())?;
        writeln!(file, "| Id | Domain | Level | Explanation |")?;
        writeln!(file, "|----|--------|-------|-------------|")?;
        for (doc, domains) in &assessed {
            for (domain, judgement) in domains.iter() {
                writeln!(
                    file,
                    "| {} | {} | {:?} | {} |",
                    doc.id, domain, judgement.level, judgement.explanation
                )?;
            }
        }
    }

    Ok(path.to_path_buf())
}
