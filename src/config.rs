use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The structured research question driving search and screening
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Picos {
    #[serde(default)]
    pub population: Option<String>,
    #[serde(default)]
    pub intervention: Option<String>,
    #[serde(default)]
    pub comparison: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub study_design: Option<String>,
}

impl Picos {
    /// Build the PubMed query: AND-joined title/abstract clauses for each
    /// populated PICO element, study design appended last
    pub fn search_query(&self) -> String {
        let mut parts = Vec::new();
        for term in [
            &self.population,
            &self.intervention,
            &self.comparison,
            &self.outcome,
        ] {
            if let Some(term) = term.as_deref().filter(|t| !t.trim().is_empty()) {
                parts.push(format!("('{}':ti,ab)", term.trim()));
            }
        }
        if let Some(design) = self.study_design.as_deref().filter(|t| !t.trim().is_empty()) {
            parts.push(format!("'{}':ti,ab", design.trim()));
        }
        parts.join(" AND ")
    }

    /// Human-readable criteria block used in screening prompts
    pub fn criteria_block(&self) -> String {
        let any = |v: &Option<String>| v.clone().unwrap_or_else(|| "Any".to_string());
        format!(
            "Population: {}\nIntervention: {}\nComparison: {}\nOutcome: {}\nStudy Design: {}",
            any(&self.population),
            any(&self.intervention),
            any(&self.comparison),
            any(&self.outcome),
            any(&self.study_design),
        )
    }
}

/// Search scope settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Maximum number of records to retrieve
    pub max_results: usize,
    /// Publication date range, YYYY/MM/DD (both or neither)
    pub min_date: Option<String>,
    pub max_date: Option<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_results: 100,
            min_date: None,
            max_date: None,
        }
    }
}

/// Endpoints and credentials for the external services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub pubmed_base_url: String,
    pub pubmed_api_key: Option<String>,
    /// Unpaywall's free tier requires a contact email
    pub unpaywall_email: String,
    pub grobid_url: String,
    /// OpenAI-compatible chat-completions base URL (local llamafile by default)
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_temperature: f64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            pubmed_base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            pubmed_api_key: None,
            unpaywall_email: "review@example.com".to_string(),
            grobid_url: "http://localhost:8070".to_string(),
            llm_base_url: "http://127.0.0.1:8080/v1".to_string(),
            llm_model: "gpt-3.5-turbo".to_string(),
            llm_temperature: 0.7,
        }
    }
}

/// Stage-level throughput policy for external service calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThroughputSettings {
    /// Concurrent in-flight documents per stage
    pub concurrency: usize,
    /// Inter-call delay per worker, in milliseconds
    pub delay_ms: u64,
}

impl Default for ThroughputSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            delay_ms: 1000,
        }
    }
}

impl ThroughputSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Screening gate policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningSettings {
    /// Treat `uncertain` decisions as included for full-text review
    pub include_uncertain: bool,
}

impl Default for ScreeningSettings {
    fn default() -> Self {
        Self {
            include_uncertain: true,
        }
    }
}

/// Complete review configuration, loaded from a YAML file and passed into
/// the orchestrator and adapters at construction. Snapshotted per run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewConfig {
    pub picos: Picos,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub services: ServiceSettings,
    #[serde(default)]
    pub limits: ThroughputSettings,
    #[serde(default)]
    pub screening: ScreeningSettings,
}

impl ReviewConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
