pub mod grobid;
pub mod llm;
pub mod pubmed;
pub mod screening;
pub mod unpaywall;

pub use grobid::*;
pub use llm::*;
pub use pubmed::*;
pub use screening::*;
pub use unpaywall::*;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::models::{DocumentMetadata, RawRecord, ScreeningDecision};

/// Literature search API client
#[async_trait]
pub trait SearchAdapter: Send + Sync {
    /// Run the query and return raw metadata records for deduplication
    async fn search(&self, query: &str) -> Result<Vec<RawRecord>, AdapterError>;
}

/// Full-text PDF retrieval
#[async_trait]
pub trait PdfAdapter: Send + Sync {
    /// Fetch the PDF bytes for a document; `NotFound` when no open-access
    /// copy exists
    async fn fetch(&self, metadata: &DocumentMetadata) -> Result<Vec<u8>, AdapterError>;
}

/// PDF to structured-text conversion service
#[async_trait]
pub trait StructuringAdapter: Send + Sync {
    /// Convert PDF bytes to plain structured text; `Parse` when the
    /// document cannot be processed
    async fn parse(&self, pdf: &[u8]) -> Result<String, AdapterError>;

    /// Liveness probe used at orchestrator start-up
    async fn check_alive(&self) -> Result<(), AdapterError>;
}

/// LLM inference client
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// One-shot completion with a system prompt and a user message
    async fn infer(&self, system: &str, user: &str) -> Result<String, AdapterError>;
}

/// Title/abstract screening model
#[async_trait]
pub trait ScreeningAdapter: Send + Sync {
    /// Decide whether the paper belongs in the review; returns the
    /// decision and a short reason for the audit trail
    async fn decide(
        &self,
        metadata: &DocumentMetadata,
    ) -> Result<(ScreeningDecision, String), AdapterError>;
}
