pub mod adapters;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod store;

pub use adapters::{
    GrobidClient, LlmAdapter, LlmClient, LlmScreener, PdfAdapter, PubMedSearch, ScreeningAdapter,
    SearchAdapter, StructuringAdapter, UnpaywallFetcher,
};
pub use config::{Picos, ReviewConfig};
pub use error::{AdapterError, StoreError};
pub use models::{
    default_sequence, Artifact, Document, DocumentMetadata, PipelineRun, RawRecord, RunSummary,
    ScreeningDecision, StageDefinition, StageKind, StageStatus,
};
pub use pipeline::{write_report, Adapters, CancelFlag, Orchestrator, StageHandler};
pub use store::{ingest_batch, DedupReport, DocumentStore};
