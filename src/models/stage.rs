use serde::{Deserialize, Serialize};

/// The processing stages a document moves through, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Corpus ingestion from the literature search API
    Search,
    /// Title/abstract screening against the PICO(S) question
    Screen,
    /// Open-access PDF retrieval
    Download,
    /// PDF to structured text conversion
    Parse,
    /// Structured data extraction from the full text
    Extract,
    /// Risk of bias assessment
    AssessBias,
}

impl StageKind {
    /// Stable snake_case name used as the stage-status key
    pub fn name(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Screen => "screen",
            Self::Download => "download",
            Self::Parse => "parse",
            Self::Extract => "extract",
            Self::AssessBias => "assess_bias",
        }
    }

    /// Parse a stage name as it appears in status keys and CLI args
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "search" => Some(Self::Search),
            "screen" => Some(Self::Screen),
            "download" => Some(Self::Download),
            "parse" => Some(Self::Parse),
            "extract" => Some(Self::Extract),
            "assess_bias" => Some(Self::AssessBias),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Retry behavior for a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Immediate retries for transient adapter failures within one run
    pub max_retries: u32,
    /// Whether documents left `failed` become eligible again on a later run
    pub retry_failed: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_failed: true,
        }
    }
}

/// Static descriptor of one pipeline stage: order, prerequisites, and
/// retry/gating behavior are data consumed by the orchestrator, not logic.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub kind: StageKind,
    /// Position in the stage sequence
    pub ordinal: usize,
    /// Stages that must be `done` before this one may run on a document
    pub prerequisites: Vec<StageKind>,
    /// Hard gate: documents this stage excludes are skipped for all later stages
    pub gate: bool,
    pub retry: RetryPolicy,
}

impl StageDefinition {
    fn new(kind: StageKind, ordinal: usize, prerequisites: Vec<StageKind>) -> Self {
        Self {
            kind,
            ordinal,
            prerequisites,
            gate: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// The default review pipeline: search, screen, download, parse, extract,
/// assess_bias. Screening is the hard gate; parse failures are permanent
/// (an unparsable PDF does not fix itself on retry).
pub fn default_sequence() -> Vec<StageDefinition> {
    vec![
        StageDefinition::new(StageKind::Search, 0, vec![]),
        StageDefinition {
            gate: true,
            ..StageDefinition::new(StageKind::Screen, 1, vec![StageKind::Search])
        },
        StageDefinition::new(StageKind::Download, 2, vec![StageKind::Screen]),
        StageDefinition {
            retry: RetryPolicy {
                max_retries: 0,
                retry_failed: true,
            },
            ..StageDefinition::new(StageKind::Parse, 3, vec![StageKind::Download])
        },
        StageDefinition::new(StageKind::Extract, 4, vec![StageKind::Parse]),
        StageDefinition::new(StageKind::AssessBias, 5, vec![StageKind::Parse]),
    ]
}

/// Stages that come after `stage` in the sequence
pub fn downstream_of(sequence: &[StageDefinition], stage: StageKind) -> Vec<StageKind> {
    sequence
        .iter()
        .skip_while(|s| s.kind != stage)
        .skip(1)
        .map(|s| s.kind)
        .collect()
}
