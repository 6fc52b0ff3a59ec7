use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::adapters::{
    GrobidClient, LlmAdapter, LlmClient, LlmScreener, PdfAdapter, PubMedSearch, ScreeningAdapter,
    SearchAdapter, StructuringAdapter, UnpaywallFetcher,
};
use crate::config::ReviewConfig;
use crate::models::{
    default_sequence, downstream_of, PipelineRun, RunSummary, ScreeningDecision, StageDefinition,
    StageKind, StageStatus,
};
use crate::pipeline::handlers::{
    BiasHandler, DownloadHandler, ExtractHandler, ParseHandler, ScreenHandler, StageHandler,
};
use crate::pipeline::runner::{run_stage, CancelFlag, StageSettings};
use crate::store::{ingest_batch, DocumentStore};

/// The external collaborators the pipeline coordinates, behind their
/// adapter seams so tests can substitute mocks.
pub struct Adapters {
    pub search: Arc<dyn SearchAdapter>,
    pub pdf: Arc<dyn PdfAdapter>,
    pub structuring: Arc<dyn StructuringAdapter>,
    pub llm: Arc<dyn LlmAdapter>,
    pub screener: Arc<dyn ScreeningAdapter>,
}

impl Adapters {
    /// Wire up the real service clients from configuration
    pub fn from_config(config: &ReviewConfig) -> Self {
        let llm: Arc<dyn LlmAdapter> = Arc::new(LlmClient::new(&config.services));
        Self {
            search: Arc::new(PubMedSearch::new(&config.services, &config.search)),
            pdf: Arc::new(UnpaywallFetcher::new(&config.services)),
            structuring: Arc::new(GrobidClient::new(&config.services)),
            screener: Arc::new(LlmScreener::new(Arc::clone(&llm), &config.picos)),
            llm,
        }
    }
}

/// Drives the stage sequence over the document store.
///
/// Holds no document state of its own: every decision is recomputed from
/// the store, so killing and restarting the process loses nothing beyond
/// the last persisted stage transition.
pub struct Orchestrator {
    store: Arc<DocumentStore>,
    adapters: Adapters,
    config: ReviewConfig,
    sequence: Vec<StageDefinition>,
    data_dir: PathBuf,
    cancel: CancelFlag,
}

impl Orchestrator {
    pub fn new(
        store: Arc<DocumentStore>,
        adapters: Adapters,
        config: ReviewConfig,
        data_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            adapters,
            config,
            sequence: default_sequence(),
            data_dir,
            cancel: CancelFlag::default(),
        }
    }

    /// Replace the default stage sequence (tests, partial reruns)
    pub fn with_sequence(mut self, sequence: Vec<StageDefinition>) -> Self {
        self.sequence = sequence;
        self
    }

    /// Handle for cooperative cancellation from a signal handler
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Verify required services are reachable before any stage executes.
    /// Unreachable services here are a run-level setup failure.
    pub async fn preflight(&self) -> Result<()> {
        let kinds: Vec<StageKind> = self.sequence.iter().map(|s| s.kind).collect();

        if kinds.contains(&StageKind::Parse) {
            self.adapters
                .structuring
                .check_alive()
                .await
                .context("parsing service unreachable")?;
            info!("Parsing service is alive");
        }

        let needs_llm = kinds.iter().any(|k| {
            matches!(
                k,
                StageKind::Screen | StageKind::Extract | StageKind::AssessBias
            )
        });
        if needs_llm {
            self.adapters
                .llm
                .infer("Respond with OK if you are ready.", "Are you ready?")
                .await
                .context("LLM service unreachable")?;
            info!("LLM service is ready");
        }

        Ok(())
    }

    /// Execute the full stage sequence and return per-stage summaries.
    ///
    /// Resume needs no special recovery: leftover in_progress documents are
    /// reclassified as failed up front, and each stage recomputes
    /// eligibility from the store, so a rerun only touches documents not
    /// yet advanced.
    pub async fn run(&self) -> Result<RunSummary> {
        let reclaimed = self.store.reclaim_interrupted()?;
        if reclaimed > 0 {
            info!(
                "Reclaimed {} in-progress stage entries from an interrupted run",
                reclaimed
            );
        }

        let kinds: Vec<StageKind> = self.sequence.iter().map(|s| s.kind).collect();
        let run = PipelineRun::new(&self.config, &kinds);
        run.write_json(&self.data_dir.join("runs"))?;
        info!("Run {} started", run.run_id);

        let settings = StageSettings {
            concurrency: self.config.limits.concurrency,
            delay: self.config.limits.delay(),
        };

        let mut summary = RunSummary {
            run_id: run.run_id.clone(),
            ..Default::default()
        };

        for stage in &self.sequence {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled before stage {}", stage.kind);
                break;
            }

            match stage.kind {
                StageKind::Search => self.run_search(stage).await?,
                _ => {
                    let handler = self.handler_for(stage.kind);
                    run_stage(&self.store, stage, handler, &settings, &self.cancel).await?;
                }
            }

            if stage.gate {
                self.propagate_gate_skips(stage)?;
            }

            let counts = self.store.counts(stage.kind);
            info!(
                "Stage {} complete: {} done, {} failed, {} skipped, {} pending",
                stage.kind, counts.done, counts.failed, counts.skipped, counts.pending
            );
            summary.stages.push(counts);
        }

        summary.total_documents = self.store.len();
        Ok(summary)
    }

    /// Corpus ingestion: query the search API, deduplicate the batch into
    /// the store, and mark the search stage done on newly entered
    /// documents. Rerunning is idempotent - merged records keep their
    /// stage state.
    async fn run_search(&self, stage: &StageDefinition) -> Result<()> {
        let query = self.config.picos.search_query();
        if query.is_empty() {
            bail!("PICOS configuration produces an empty search query");
        }

        let mut result = self.adapters.search.search(&query).await;
        for attempt in 1..=stage.retry.max_retries {
            match &result {
                Err(e) if e.is_transient() => {
                    info!("Search retry {} of {}", attempt, stage.retry.max_retries);
                    result = self.adapters.search.search(&query).await;
                }
                _ => break,
            }
        }

        let sequence: Vec<StageKind> = self.sequence.iter().map(|s| s.kind).collect();
        match result {
            Ok(records) => {
                let report = ingest_batch(&self.store, records, &sequence)?;
                info!(
                    "Search ingested {} new, merged {}, discarded {}",
                    report.created, report.merged, report.discarded
                );
            }
            Err(error) => {
                if self.store.is_empty() {
                    return Err(error).context("search failed and the store is empty");
                }
                warn!(
                    "Search failed ({}); continuing with {} existing documents",
                    error,
                    self.store.len()
                );
            }
        }

        // Newly ingested documents enter the pipeline here
        for doc in self.store.documents() {
            if doc.status(StageKind::Search) == Some(StageStatus::Pending)
                || doc.status(StageKind::Search) == Some(StageStatus::Failed)
            {
                let source = doc
                    .metadata
                    .source
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                self.store.record_result(
                    &doc.id,
                    StageKind::Search,
                    crate::models::Artifact::Ingested { source },
                )?;
            }
        }
        Ok(())
    }

    /// Hard-gate enforcement: documents excluded at the gate are skipped
    /// for every later stage, permanently removing them from eligibility.
    fn propagate_gate_skips(&self, stage: &StageDefinition) -> Result<()> {
        let later = downstream_of(&self.sequence, stage.kind);
        let reason = format!("excluded at {}", stage.kind);

        for doc in self.store.documents() {
            let excluded = match doc.screening_decision() {
                Some(ScreeningDecision::Exclude) => true,
                Some(ScreeningDecision::Uncertain) => !self.config.screening.include_uncertain,
                _ => false,
            };
            if !excluded {
                continue;
            }
            for kind in &later {
                if doc.status(*kind) == Some(StageStatus::Pending)
                    || doc.status(*kind) == Some(StageStatus::Failed)
                {
                    self.store.record_skip(&doc.id, *kind, &reason)?;
                }
            }
        }
        Ok(())
    }

    fn handler_for(&self, kind: StageKind) -> Arc<dyn StageHandler> {
        match kind {
            StageKind::Screen => Arc::new(ScreenHandler {
                screener: Arc::clone(&self.adapters.screener),
            }),
            StageKind::Download => Arc::new(DownloadHandler {
                pdf: Arc::clone(&self.adapters.pdf),
                pdf_dir: self.data_dir.join("pdf"),
            }),
            StageKind::Parse => Arc::new(ParseHandler {
                structuring: Arc::clone(&self.adapters.structuring),
                text_dir: self.data_dir.join("text"),
            }),
            StageKind::Extract => Arc::new(ExtractHandler {
                llm: Arc::clone(&self.adapters.llm),
            }),
            StageKind::AssessBias => Arc::new(BiasHandler {
                llm: Arc::clone(&self.adapters.llm),
            }),
            StageKind::Search => unreachable!("search runs outside the stage runner"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::AdapterError;
    use crate::models::{Artifact, DocumentMetadata, RawRecord};

    struct MockSearch {
        batch: Vec<RawRecord>,
        fail_with: Mutex<Vec<AdapterError>>,
        calls: Mutex<usize>,
    }

    impl MockSearch {
        fn returning(batch: Vec<RawRecord>) -> Self {
            Self {
                batch,
                fail_with: Mutex::new(Vec::new()),
                calls: Mutex::new(0),
            }
        }

        fn failing(errors: Vec<AdapterError>) -> Self {
            Self {
                batch: Vec::new(),
                fail_with: Mutex::new(errors),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl SearchAdapter for MockSearch {
        async fn search(&self, _query: &str) -> Result<Vec<RawRecord>, AdapterError> {
            *self.calls.lock().unwrap() += 1;
            let mut fail_with = self.fail_with.lock().unwrap();
            if fail_with.is_empty() {
                Ok(self.batch.clone())
            } else {
                Err(fail_with.remove(0))
            }
        }
    }

    /// Per-DOI queue of fetch results; defaults to a tiny valid payload
    struct MockPdf {
        script: Mutex<HashMap<String, Vec<Result<Vec<u8>, AdapterError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockPdf {
        fn ok() -> Self {
            Self::scripted(HashMap::new())
        }

        fn scripted(script: HashMap<String, Vec<Result<Vec<u8>, AdapterError>>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self, doi: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == doi).count()
        }
    }

    #[async_trait]
    impl PdfAdapter for MockPdf {
        async fn fetch(&self, metadata: &DocumentMetadata) -> Result<Vec<u8>, AdapterError> {
            let doi = metadata.doi.clone().unwrap_or_default();
            self.calls.lock().unwrap().push(doi.clone());
            let mut script = self.script.lock().unwrap();
            script
                .get_mut(&doi)
                .and_then(|queue| (!queue.is_empty()).then(|| queue.remove(0)))
                .unwrap_or_else(|| Ok(b"%PDF-1.4 test".to_vec()))
        }
    }

    struct MockStructuring {
        alive: bool,
    }

    #[async_trait]
    impl StructuringAdapter for MockStructuring {
        async fn parse(&self, _pdf: &[u8]) -> Result<String, AdapterError> {
            Ok("Methods: participants were randomized.".to_string())
        }

        async fn check_alive(&self) -> Result<(), AdapterError> {
            if self.alive {
                Ok(())
            } else {
                Err(AdapterError::unavailable("grobid", "connection refused"))
            }
        }
    }

    /// Answers by prompt: extraction and risk-of-bias prompts get matching
    /// JSON, everything else gets "OK"
    struct MockLlm {
        calls: Mutex<usize>,
    }

    impl MockLlm {
        fn new() -> Self {
            Self {
                calls: Mutex::new(0),
            }
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmAdapter for MockLlm {
        async fn infer(&self, system: &str, _user: &str) -> Result<String, AdapterError> {
            *self.calls.lock().unwrap() += 1;
            if system.contains("data extraction") {
                Ok(r#"{"study_design": "RCT", "sample_size": "120"}"#.to_string())
            } else if system.contains("Risk of Bias") {
                Ok(r#"{"Randomization": {"level": "Low", "explanation": "computer generated"}}"#
                    .to_string())
            } else {
                Ok("OK".to_string())
            }
        }
    }

    /// Decides by title; anything unlisted is included
    struct MockScreener {
        exclude_titles: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl MockScreener {
        fn include_all() -> Self {
            Self::excluding(&[])
        }

        fn excluding(titles: &[&str]) -> Self {
            Self {
                exclude_titles: titles.iter().map(|t| t.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ScreeningAdapter for MockScreener {
        async fn decide(
            &self,
            metadata: &DocumentMetadata,
        ) -> Result<(ScreeningDecision, String), AdapterError> {
            let title = metadata.title.clone().unwrap_or_default();
            self.calls.lock().unwrap().push(title.clone());
            if self.exclude_titles.contains(&title) {
                Ok((ScreeningDecision::Exclude, "wrong population".to_string()))
            } else {
                Ok((ScreeningDecision::Include, "matches criteria".to_string()))
            }
        }
    }

    fn record(id: &str, title: &str, doi: &str) -> RawRecord {
        RawRecord {
            external_id: Some(id.to_string()),
            metadata: DocumentMetadata {
                title: Some(title.to_string()),
                doi: Some(doi.to_string()),
                source: Some("pubmed".to_string()),
                ..Default::default()
            },
        }
    }

    fn test_config() -> ReviewConfig {
        let mut config = ReviewConfig::default();
        config.picos.population = Some("adults".to_string());
        config.limits.delay_ms = 0;
        config.limits.concurrency = 2;
        config
    }

    fn orchestrator(
        dir: &tempfile::TempDir,
        adapters: Adapters,
        config: ReviewConfig,
    ) -> Orchestrator {
        let store =
            Arc::new(DocumentStore::open(&dir.path().join("documents.json")).unwrap());
        Orchestrator::new(store, adapters, config, dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn test_full_pipeline_all_stages_complete() {
        let dir = tempfile::tempdir().unwrap();
        let adapters = Adapters {
            search: Arc::new(MockSearch::returning(vec![
                record("1001", "Trial A", "10.1/a"),
                record("1002", "Trial B", "10.1/b"),
            ])),
            pdf: Arc::new(MockPdf::ok()),
            structuring: Arc::new(MockStructuring { alive: true }),
            llm: Arc::new(MockLlm::new()),
            screener: Arc::new(MockScreener::include_all()),
        };
        let orch = orchestrator(&dir, adapters, test_config());

        orch.preflight().await.unwrap();
        let summary = orch.run().await.unwrap();

        assert_eq!(summary.total_documents, 2);
        assert_eq!(summary.stages.len(), 6);
        for doc in orch.store().documents() {
            for slot in &doc.stages {
                assert_eq!(
                    slot.status,
                    StageStatus::Done,
                    "{} at {}",
                    doc.id,
                    slot.stage
                );
            }
        }
        assert!(dir.path().join("pdf/1001.pdf").exists());
        assert!(dir.path().join("text/1001.txt").exists());
        // The run record was persisted
        let runs: Vec<_> = std::fs::read_dir(dir.path().join("runs"))
            .unwrap()
            .collect();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::new());
        let screener = Arc::new(MockScreener::include_all());
        let pdf = Arc::new(MockPdf::ok());
        let adapters = Adapters {
            search: Arc::new(MockSearch::returning(vec![record(
                "1001", "Trial A", "10.1/a",
            )])),
            pdf: Arc::clone(&pdf) as Arc<dyn PdfAdapter>,
            structuring: Arc::new(MockStructuring { alive: true }),
            llm: Arc::clone(&llm) as Arc<dyn LlmAdapter>,
            screener: Arc::clone(&screener) as Arc<dyn ScreeningAdapter>,
        };
        let orch = orchestrator(&dir, adapters, test_config());

        orch.run().await.unwrap();
        let screens = screener.call_count();
        let inferences = llm.call_count();

        let summary = orch.run().await.unwrap();

        assert_eq!(screener.call_count(), screens);
        assert_eq!(llm.call_count(), inferences);
        assert_eq!(pdf.call_count("10.1/a"), 1);
        assert_eq!(summary.total_documents, 1);
        assert_eq!(summary.stage("extract").unwrap().done, 1);
    }

    #[tokio::test]
    async fn test_excluded_document_skips_downstream_stages() {
        let dir = tempfile::tempdir().unwrap();
        let adapters = Adapters {
            search: Arc::new(MockSearch::returning(vec![
                record("1001", "Trial A", "10.1/a"),
                record("1002", "Off-topic B", "10.1/b"),
            ])),
            pdf: Arc::new(MockPdf::ok()),
            structuring: Arc::new(MockStructuring { alive: true }),
            llm: Arc::new(MockLlm::new()),
            screener: Arc::new(MockScreener::excluding(&["Off-topic B"])),
        };
        let orch = orchestrator(&dir, adapters, test_config());

        orch.run().await.unwrap();

        let excluded = orch.store().get("1002").unwrap();
        assert_eq!(excluded.status(StageKind::Screen), Some(StageStatus::Done));
        for kind in [
            StageKind::Download,
            StageKind::Parse,
            StageKind::Extract,
            StageKind::AssessBias,
        ] {
            assert_eq!(excluded.status(kind), Some(StageStatus::Skipped));
            assert_eq!(
                excluded.slot(kind).unwrap().skip_reason.as_deref(),
                Some("excluded at screen")
            );
        }
        assert!(!dir.path().join("pdf/1002.pdf").exists());

        let included = orch.store().get("1001").unwrap();
        assert_eq!(
            included.status(StageKind::AssessBias),
            Some(StageStatus::Done)
        );
    }

    #[tokio::test]
    async fn test_failed_download_retried_on_next_run_only() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = Arc::new(MockPdf::scripted(HashMap::from([(
            "10.1/b".to_string(),
            vec![
                Err(AdapterError::NotFound("no open-access copy".into())),
                Ok(b"%PDF-1.4 late".to_vec()),
            ],
        )])));
        let screener = Arc::new(MockScreener::include_all());
        let adapters = Adapters {
            search: Arc::new(MockSearch::returning(vec![
                record("1001", "Trial A", "10.1/a"),
                record("1002", "Trial B", "10.1/b"),
            ])),
            pdf: Arc::clone(&pdf) as Arc<dyn PdfAdapter>,
            structuring: Arc::new(MockStructuring { alive: true }),
            llm: Arc::new(MockLlm::new()),
            screener: Arc::clone(&screener) as Arc<dyn ScreeningAdapter>,
        };
        let orch = orchestrator(&dir, adapters, test_config());

        orch.run().await.unwrap();

        let b = orch.store().get("1002").unwrap();
        assert_eq!(b.status(StageKind::Download), Some(StageStatus::Failed));
        assert_eq!(
            b.slot(StageKind::Download).unwrap().last_error.as_ref().unwrap().kind,
            "not_found"
        );
        // Downstream stages never became eligible
        assert_eq!(b.status(StageKind::Parse), Some(StageStatus::Pending));
        assert_eq!(
            orch.store().get("1001").unwrap().status(StageKind::AssessBias),
            Some(StageStatus::Done)
        );

        orch.run().await.unwrap();

        let b = orch.store().get("1002").unwrap();
        assert_eq!(b.status(StageKind::Download), Some(StageStatus::Done));
        assert_eq!(b.status(StageKind::AssessBias), Some(StageStatus::Done));
        // A's PDF was fetched once across both runs; B needed the second try
        assert_eq!(pdf.call_count("10.1/a"), 1);
        assert_eq!(pdf.call_count("10.1/b"), 2);
        // A was screened once in total
        assert_eq!(screener.call_count(), 2);
    }

    #[tokio::test]
    async fn test_search_failure_with_existing_corpus_continues() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Arc::new(DocumentStore::open(&dir.path().join("documents.json")).unwrap());
        let adapters = Adapters {
            search: Arc::new(MockSearch::returning(vec![record(
                "1001", "Trial A", "10.1/a",
            )])),
            pdf: Arc::new(MockPdf::ok()),
            structuring: Arc::new(MockStructuring { alive: true }),
            llm: Arc::new(MockLlm::new()),
            screener: Arc::new(MockScreener::include_all()),
        };
        let orch = Orchestrator::new(
            Arc::clone(&store),
            adapters,
            test_config(),
            dir.path().to_path_buf(),
        );
        orch.run().await.unwrap();

        // New orchestrator over the same store, but the search API is down
        let adapters = Adapters {
            search: Arc::new(MockSearch::failing(vec![
                AdapterError::unavailable("pubmed", "503"),
                AdapterError::unavailable("pubmed", "503"),
                AdapterError::unavailable("pubmed", "503"),
            ])),
            pdf: Arc::new(MockPdf::ok()),
            structuring: Arc::new(MockStructuring { alive: true }),
            llm: Arc::new(MockLlm::new()),
            screener: Arc::new(MockScreener::include_all()),
        };
        let orch = Orchestrator::new(store, adapters, test_config(), dir.path().to_path_buf());
        let summary = orch.run().await.unwrap();
        assert_eq!(summary.total_documents, 1);
    }

    #[tokio::test]
    async fn test_search_failure_on_empty_store_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let adapters = Adapters {
            search: Arc::new(MockSearch::failing(vec![
                AdapterError::unavailable("pubmed", "503"),
                AdapterError::unavailable("pubmed", "503"),
                AdapterError::unavailable("pubmed", "503"),
            ])),
            pdf: Arc::new(MockPdf::ok()),
            structuring: Arc::new(MockStructuring { alive: true }),
            llm: Arc::new(MockLlm::new()),
            screener: Arc::new(MockScreener::include_all()),
        };
        let orch = orchestrator(&dir, adapters, test_config());
        assert!(orch.run().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_query_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let adapters = Adapters {
            search: Arc::new(MockSearch::returning(Vec::new())),
            pdf: Arc::new(MockPdf::ok()),
            structuring: Arc::new(MockStructuring { alive: true }),
            llm: Arc::new(MockLlm::new()),
            screener: Arc::new(MockScreener::include_all()),
        };
        let mut config = test_config();
        config.picos = crate::config::Picos::default();
        let orch = orchestrator(&dir, adapters, config);
        assert!(orch.run().await.is_err());
    }

    #[tokio::test]
    async fn test_interrupted_stage_entries_reclaimed_and_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let screener = Arc::new(MockScreener::include_all());
        let adapters = Adapters {
            search: Arc::new(MockSearch::returning(vec![record(
                "1001", "Trial A", "10.1/a",
            )])),
            pdf: Arc::new(MockPdf::ok()),
            structuring: Arc::new(MockStructuring { alive: true }),
            llm: Arc::new(MockLlm::new()),
            screener: Arc::clone(&screener) as Arc<dyn ScreeningAdapter>,
        };
        let orch = orchestrator(&dir, adapters, test_config());

        // Simulate a crash mid-screen: the claim was persisted, the result
        // was not
        let sequence: Vec<StageKind> = default_sequence().iter().map(|s| s.kind).collect();
        orch.store()
            .upsert_metadata("1001", DocumentMetadata::default(), &sequence)
            .unwrap();
        orch.store()
            .record_result(
                "1001",
                StageKind::Search,
                Artifact::Ingested {
                    source: "pubmed".into(),
                },
            )
            .unwrap();
        orch.store().claim("1001", StageKind::Screen).unwrap();

        orch.run().await.unwrap();

        let doc = orch.store().get("1001").unwrap();
        assert_eq!(doc.status(StageKind::Screen), Some(StageStatus::Done));
        assert_eq!(doc.status(StageKind::AssessBias), Some(StageStatus::Done));
        assert_eq!(screener.call_count(), 1);
    }

    #[tokio::test]
    async fn test_preflight_fails_when_parsing_service_down() {
        let dir = tempfile::tempdir().unwrap();
        let adapters = Adapters {
            search: Arc::new(MockSearch::returning(Vec::new())),
            pdf: Arc::new(MockPdf::ok()),
            structuring: Arc::new(MockStructuring { alive: false }),
            llm: Arc::new(MockLlm::new()),
            screener: Arc::new(MockScreener::include_all()),
        };
        let orch = orchestrator(&dir, adapters, test_config());
        assert!(orch.preflight().await.is_err());
    }
}
