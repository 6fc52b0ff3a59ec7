use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::StageKind;

/// Bibliographic metadata for one candidate paper.
///
/// All fields except the id are optional: sources differ in what they
/// return, and the deduplicator fills gaps from later batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Publication year as reported by the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    /// Where the record came from (e.g., "pubmed") - immutable once set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl DocumentMetadata {
    /// Merge `other` into self: non-null fields fill gaps, populated fields
    /// are never overwritten, and `source` is first-seen-wins.
    pub fn fill_from(&mut self, other: &DocumentMetadata) {
        if self.title.is_none() {
            self.title = other.title.clone();
        }
        if self.abstract_text.is_none() {
            self.abstract_text = other.abstract_text.clone();
        }
        if self.authors.is_empty() {
            self.authors = other.authors.clone();
        }
        if self.year.is_none() {
            self.year = other.year.clone();
        }
        if self.journal.is_none() {
            self.journal = other.journal.clone();
        }
        if self.doi.is_none() {
            self.doi = other.doi.clone();
        }
        if self.source.is_none() {
            self.source = other.source.clone();
        }
    }
}

/// Per-stage processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Skipped,
}

impl StageStatus {
    /// A terminal status requires no further automatic action this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }
}

/// Screening decision from the title/abstract screener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningDecision {
    Include,
    Exclude,
    /// The abstract was missing, vague, or the reply unparseable; defaults
    /// to full-text review unless configured otherwise
    Uncertain,
}

/// Risk-of-bias judgement level (RoB 2 vocabulary)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiasLevel {
    Low,
    High,
    #[serde(
        rename = "Unclear/Some Concerns",
        alias = "Unclear",
        alias = "Some Concerns"
    )]
    Unclear,
}

/// One assessed bias domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasDomain {
    pub level: BiasLevel,
    #[serde(default)]
    pub explanation: String,
}

/// Output reference produced by a completed stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    /// The document entered the corpus from a search source
    Ingested { source: String },
    /// Title/abstract screening decision
    Screening {
        decision: ScreeningDecision,
        reason: String,
    },
    /// Retrieved PDF on disk
    PdfFile { path: PathBuf },
    /// Plain text extracted from the parsed full text, on disk
    StructuredText { path: PathBuf },
    /// Structured study data extracted by the LLM
    Extraction { record: serde_json::Value },
    /// Risk-of-bias assessment per domain
    BiasAssessment {
        domains: BTreeMap<String, BiasDomain>,
    },
}

/// Last failure detail kept per stage for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    /// Error kind tag (e.g., "not_found", "rate_limited")
    pub kind: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl StageError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Status, artifact, and last error for one stage of one document.
///
/// Slots live in stage-sequence order on the document, which keeps the
/// status map insertion-ordered and makes the done-iff-artifact invariant
/// a local property of each slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSlot {
    pub stage: StageKind,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<StageError>,
    /// Why the stage was skipped (e.g., excluded at screening)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StageSlot {
    pub fn pending(stage: StageKind) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            artifact: None,
            last_error: None,
            skip_reason: None,
        }
    }
}

/// Freshly retrieved metadata from a search source, before deduplication.
/// Some sources omit the external identifier; the deduplicator then falls
/// back to a title/author fingerprint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub external_id: Option<String>,
    pub metadata: DocumentMetadata,
}

/// One candidate or included paper tracked through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable external identifier (PMID, or a derived fallback key); never reused
    pub id: String,
    pub metadata: DocumentMetadata,
    /// Per-stage state in stage-sequence order
    pub stages: Vec<StageSlot>,
}

impl Document {
    /// Create a new document with every stage in `sequence` pending
    pub fn new(id: String, metadata: DocumentMetadata, sequence: &[StageKind]) -> Self {
        Self {
            id,
            metadata,
            stages: sequence.iter().map(|s| StageSlot::pending(*s)).collect(),
        }
    }

    /// Add pending slots for stages the document does not know yet
    /// (a later run may use a longer sequence)
    pub fn ensure_stages(&mut self, sequence: &[StageKind]) {
        for stage in sequence {
            if !self.stages.iter().any(|s| s.stage == *stage) {
                self.stages.push(StageSlot::pending(*stage));
            }
        }
    }

    pub fn slot(&self, stage: StageKind) -> Option<&StageSlot> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn slot_mut(&mut self, stage: StageKind) -> Option<&mut StageSlot> {
        self.stages.iter_mut().find(|s| s.stage == stage)
    }

    pub fn status(&self, stage: StageKind) -> Option<StageStatus> {
        self.slot(stage).map(|s| s.status)
    }

    pub fn artifact(&self, stage: StageKind) -> Option<&Artifact> {
        self.slot(stage).and_then(|s| s.artifact.as_ref())
    }

    /// The screening decision, if the screen stage completed
    pub fn screening_decision(&self) -> Option<ScreeningDecision> {
        match self.artifact(StageKind::Screen) {
            Some(Artifact::Screening { decision, .. }) => Some(*decision),
            _ => None,
        }
    }

    /// Whether every stage in `sequence` has reached a terminal status
    pub fn is_terminal_for(&self, sequence: &[StageKind]) -> bool {
        sequence.iter().all(|stage| {
            self.status(*stage)
                .is_some_and(|status| status.is_terminal())
        })
    }
}
