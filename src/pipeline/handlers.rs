use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::adapters::{
    extract_json_block, LlmAdapter, PdfAdapter, ScreeningAdapter, StructuringAdapter,
};
use crate::error::AdapterError;
use crate::models::{Artifact, BiasDomain, Document, StageKind};

/// Full-text snippets sent to the LLM are truncated to stay inside the
/// context window of a local model
const MAX_FULLTEXT_CHARS: usize = 12_000;

pub const EXTRACTION_SYSTEM_PROMPT: &str = "\
You are an expert systematic reviewer performing data extraction.
Read the provided research paper text and extract the key study characteristics.

Output Format:
JSON object with the keys: \"study_design\", \"population\", \"sample_size\", \
\"interventions\", \"comparators\", \"outcomes\", \"follow_up\", \"key_findings\".
Use null for anything the text does not report. Keep each value to one or two sentences.";

pub const ROB_SYSTEM_PROMPT: &str = "\
You are an expert in the Cochrane Risk of Bias assessment tool (RoB 2) and ROBINS-I.
Analyze the provided research paper text and assess the risk of bias for the following domains:
1. Randomization (Selection Bias)
2. Deviations from intended interventions (Performance Bias)
3. Missing outcome data (Attrition Bias)
4. Measurement of the outcome (Detection Bias)
5. Selection of the reported result (Reporting Bias)

For each domain, determine the risk level: \"Low\", \"High\", or \"Unclear/Some Concerns\".
Provide a brief explanation for your judgment.

Output Format:
JSON object with keys as domain names (e.g., \"Randomization\") and values as an object \
{\"level\": \"...\", \"explanation\": \"...\"}.";

/// What a stage did with one document
#[derive(Debug)]
pub enum StageAction {
    /// The stage completed; record its artifact
    Complete(Artifact),
    /// The stage decided the document needs no processing here
    Skip(String),
}

/// One stage's per-document processing function. Implementations call a
/// single external adapter and translate its output into an artifact; all
/// failure handling lives in the stage runner.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn process(&self, doc: &Document) -> Result<StageAction, AdapterError>;
}

/// Title/abstract screening against the PICO(S) question
pub struct ScreenHandler {
    pub screener: Arc<dyn ScreeningAdapter>,
}

#[async_trait]
impl StageHandler for ScreenHandler {
    async fn process(&self, doc: &Document) -> Result<StageAction, AdapterError> {
        let (decision, reason) = self.screener.decide(&doc.metadata).await?;
        Ok(StageAction::Complete(Artifact::Screening {
            decision,
            reason,
        }))
    }
}

/// Open-access PDF retrieval into `<pdf_dir>/<id>.pdf`
pub struct DownloadHandler {
    pub pdf: Arc<dyn PdfAdapter>,
    pub pdf_dir: PathBuf,
}

#[async_trait]
impl StageHandler for DownloadHandler {
    async fn process(&self, doc: &Document) -> Result<StageAction, AdapterError> {
        std::fs::create_dir_all(&self.pdf_dir)?;
        let path = self.pdf_dir.join(format!("{}.pdf", safe_file_stem(&doc.id)));

        // A manually placed PDF counts as retrieved
        if path.exists() {
            debug!("PDF for {} already on disk", doc.id);
            return Ok(StageAction::Complete(Artifact::PdfFile { path }));
        }

        let bytes = self.pdf.fetch(&doc.metadata).await?;
        std::fs::write(&path, bytes)?;
        Ok(StageAction::Complete(Artifact::PdfFile { path }))
    }
}

/// PDF to structured text via the parsing service, into `<text_dir>/<id>.txt`
pub struct ParseHandler {
    pub structuring: Arc<dyn StructuringAdapter>,
    pub text_dir: PathBuf,
}

#[async_trait]
impl StageHandler for ParseHandler {
    async fn process(&self, doc: &Document) -> Result<StageAction, AdapterError> {
        let pdf_path = match doc.artifact(StageKind::Download) {
            Some(Artifact::PdfFile { path }) => path.clone(),
            _ => {
                return Err(AdapterError::NotFound(format!(
                    "no PDF artifact for {}",
                    doc.id
                )));
            }
        };
        let pdf = std::fs::read(&pdf_path)?;
        let text = self.structuring.parse(&pdf).await?;

        std::fs::create_dir_all(&self.text_dir)?;
        let path = self.text_dir.join(format!("{}.txt", safe_file_stem(&doc.id)));
        std::fs::write(&path, &text)?;
        Ok(StageAction::Complete(Artifact::StructuredText { path }))
    }
}

/// LLM data extraction over the structured text
pub struct ExtractHandler {
    pub llm: Arc<dyn LlmAdapter>,
}

#[async_trait]
impl StageHandler for ExtractHandler {
    async fn process(&self, doc: &Document) -> Result<StageAction, AdapterError> {
        let text = read_structured_text(doc)?;
        let prompt = format!("Paper text:\n---\n{text}\n---\n\nExtract the study data. Return JSON.");
        let reply = self.llm.infer(EXTRACTION_SYSTEM_PROMPT, &prompt).await?;

        let json = extract_json_block(&reply)
            .ok_or_else(|| AdapterError::Parse("no JSON in extraction reply".into()))?;
        let record: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| AdapterError::Parse(format!("extraction reply: {e}")))?;
        Ok(StageAction::Complete(Artifact::Extraction { record }))
    }
}

/// LLM risk-of-bias assessment over the structured text
pub struct BiasHandler {
    pub llm: Arc<dyn LlmAdapter>,
}

#[async_trait]
impl StageHandler for BiasHandler {
    async fn process(&self, doc: &Document) -> Result<StageAction, AdapterError> {
        let text = read_structured_text(doc)?;
        let prompt =
            format!("Paper text:\n---\n{text}\n---\n\nAssess the Risk of Bias. Return JSON.");
        let reply = self.llm.infer(ROB_SYSTEM_PROMPT, &prompt).await?;

        let json = extract_json_block(&reply)
            .ok_or_else(|| AdapterError::Parse("no JSON in RoB reply".into()))?;
        let domains: BTreeMap<String, BiasDomain> = serde_json::from_str(json)
            .map_err(|e| AdapterError::Parse(format!("RoB reply: {e}")))?;
        Ok(StageAction::Complete(Artifact::BiasAssessment { domains }))
    }
}

fn read_structured_text(doc: &Document) -> Result<String, AdapterError> {
    let path = match doc.artifact(StageKind::Parse) {
        Some(Artifact::StructuredText { path }) => path.clone(),
        _ => {
            return Err(AdapterError::NotFound(format!(
                "no structured text artifact for {}",
                doc.id
            )));
        }
    };
    let text = std::fs::read_to_string(&path)?;
    Ok(truncate_chars(&text, MAX_FULLTEXT_CHARS))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max).collect();
        out.push_str("...");
        out
    }
}

/// Document ids become file names; fingerprint ids contain spaces and
/// punctuation that need flattening
pub fn safe_file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}
