use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::models::{Document, StageDefinition, StageError, StageKind};
use crate::pipeline::handlers::{StageAction, StageHandler};
use crate::store::DocumentStore;

/// Cooperative cancellation shared between the signal handler and the
/// orchestrator. Cancelling stops new documents from being dispatched;
/// in-flight calls finish and are recorded.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Throughput policy for one stage's external service calls
#[derive(Debug, Clone)]
pub struct StageSettings {
    /// Concurrent in-flight documents
    pub concurrency: usize,
    /// Inter-call delay applied per worker before each adapter call
    pub delay: Duration,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            delay: Duration::ZERO,
        }
    }
}

/// Per-stage processing counts for the batch just executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageOutcome {
    pub processed: usize,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy)]
enum DocOutcome {
    Done,
    Failed,
    Skipped,
}

/// Execute one stage over every currently eligible document.
///
/// Each document is claimed, processed through the stage handler with
/// bounded concurrency, and recorded back - one document's failure never
/// aborts the batch. Transient adapter failures get the stage's immediate
/// retries; permanent ones are recorded as failed right away. Store errors
/// are run-level and do abort.
pub async fn run_stage(
    store: &Arc<DocumentStore>,
    stage: &StageDefinition,
    handler: Arc<dyn StageHandler>,
    settings: &StageSettings,
    cancel: &CancelFlag,
) -> Result<StageOutcome, StoreError> {
    let eligible = store.get_eligible(stage);
    info!(
        "Stage {}: {} documents eligible",
        stage.kind,
        eligible.len()
    );

    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut join_set: JoinSet<(String, Result<DocOutcome, StoreError>)> = JoinSet::new();

    let mut outcome = StageOutcome::default();
    for doc in eligible {
        if cancel.is_cancelled() {
            warn!("Stage {}: cancelled, not dispatching remaining documents", stage.kind);
            break;
        }

        let store = Arc::clone(store);
        let handler = Arc::clone(&handler);
        let semaphore = Arc::clone(&semaphore);
        let kind = stage.kind;
        let max_retries = stage.retry.max_retries;
        let delay = settings.delay;

        outcome.processed += 1;
        join_set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("stage semaphore closed");
            let result = process_document(&store, &doc, kind, max_retries, delay, handler.as_ref())
                .await;
            (doc.id, result)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((_, Ok(DocOutcome::Done))) => outcome.done += 1,
            Ok((_, Ok(DocOutcome::Failed))) => outcome.failed += 1,
            Ok((_, Ok(DocOutcome::Skipped))) => outcome.skipped += 1,
            Ok((_, Err(store_err))) => return Err(store_err),
            Err(join_err) => {
                // A panicked task leaves its document in_progress; the next
                // run reclaims it
                warn!("Stage {} worker panicked: {}", stage.kind, join_err);
                outcome.failed += 1;
            }
        }
    }

    Ok(outcome)
}

async fn process_document(
    store: &DocumentStore,
    doc: &Document,
    stage: StageKind,
    max_retries: u32,
    delay: Duration,
    handler: &dyn StageHandler,
) -> Result<DocOutcome, StoreError> {
    store.claim(&doc.id, stage)?;

    let mut attempt = 0u32;
    loop {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match handler.process(doc).await {
            Ok(StageAction::Complete(artifact)) => {
                store.record_result(&doc.id, stage, artifact)?;
                return Ok(DocOutcome::Done);
            }
            Ok(StageAction::Skip(reason)) => {
                store.record_skip(&doc.id, stage, &reason)?;
                return Ok(DocOutcome::Skipped);
            }
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                warn!(
                    "{} at stage {}: {} (retry {} of {})",
                    doc.id, stage, e, attempt, max_retries
                );
            }
            Err(e) => {
                warn!("{} at stage {}: {}", doc.id, stage, e);
                store.record_failure(&doc.id, stage, StageError::new(e.kind(), e.to_string()))?;
                return Ok(DocOutcome::Failed);
            }
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
    use crate::models::{
        default_sequence, Artifact, DocumentMetadata, StageStatus,
    };

    /// Scripted handler: maps document id to a queue of results
    struct ScriptedHandler {
        script: Mutex<HashMap<String, Vec<Result<StageAction, AdapterError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedHandler {
        fn new(script: HashMap<String, Vec<Result<StageAction, AdapterError>>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self, id: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == id).count()
        }
    }

    #[async_trait]
    impl StageHandler for ScriptedHandler {
        async fn process(&self, doc: &Document) -> Result<StageAction, AdapterError> {
            self.calls.lock().unwrap().push(doc.id.clone());
            let mut script = self.script.lock().unwrap();
            script
                .get_mut(&doc.id)
                .and_then(|queue| (!queue.is_empty()).then(|| queue.remove(0)))
                .unwrap_or_else(|| {
                    Ok(StageAction::Complete(Artifact::Ingested {
                        source: "test".into(),
                    }))
                })
        }
    }

    fn sequence() -> Vec<StageKind> {
        default_sequence().iter().map(|s| s.kind).collect()
    }

    fn search_def() -> StageDefinition {
        default_sequence()
            .into_iter()
            .find(|s| s.kind == StageKind::Search)
            .unwrap()
    }

    fn store_with_docs(dir: &tempfile::TempDir, ids: &[&str]) -> Arc<DocumentStore> {
        let store =
            Arc::new(DocumentStore::open(&dir.path().join("documents.json")).unwrap());
        for id in ids {
            store
                .upsert_metadata(id, DocumentMetadata::default(), &sequence())
                .unwrap();
        }
        store
    }

    fn ok_artifact() -> Result<StageAction, AdapterError> {
        Ok(StageAction::Complete(Artifact::Ingested {
            source: "test".into(),
        }))
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_docs(&dir, &["a", "b", "c"]);
        let handler = Arc::new(ScriptedHandler::new(HashMap::from([(
            "b".to_string(),
            vec![Err(AdapterError::NotFound("no pdf".into()))],
        )])));

        let outcome = run_stage(
            &store,
            &search_def(),
            handler,
            &StageSettings::default(),
            &CancelFlag::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.done, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(
            store.get("a").unwrap().status(StageKind::Search),
            Some(StageStatus::Done)
        );
        let b = store.get("b").unwrap();
        assert_eq!(b.status(StageKind::Search), Some(StageStatus::Failed));
        assert_eq!(
            b.slot(StageKind::Search).unwrap().last_error.as_ref().unwrap().kind,
            "not_found"
        );
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_docs(&dir, &["a"]);
        let handler = Arc::new(ScriptedHandler::new(HashMap::from([(
            "a".to_string(),
            vec![
                Err(AdapterError::rate_limited("pubmed")),
                Err(AdapterError::unavailable("pubmed", "502")),
                ok_artifact(),
            ],
        )])));

        let outcome = run_stage(
            &store,
            &search_def(), // max_retries = 2
            Arc::clone(&handler) as Arc<dyn StageHandler>,
            &StageSettings::default(),
            &CancelFlag::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.done, 1);
        assert_eq!(handler.call_count("a"), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_retries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_docs(&dir, &["a"]);
        let handler = Arc::new(ScriptedHandler::new(HashMap::from([(
            "a".to_string(),
            vec![
                Err(AdapterError::rate_limited("pubmed")),
                Err(AdapterError::rate_limited("pubmed")),
                Err(AdapterError::rate_limited("pubmed")),
            ],
        )])));

        let outcome = run_stage(
            &store,
            &search_def(),
            Arc::clone(&handler) as Arc<dyn StageHandler>,
            &StageSettings::default(),
            &CancelFlag::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.failed, 1);
        assert_eq!(handler.call_count("a"), 3); // initial + 2 retries
        assert_eq!(
            store.get("a").unwrap().status(StageKind::Search),
            Some(StageStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_no_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_docs(&dir, &["a"]);
        let handler = Arc::new(ScriptedHandler::new(HashMap::from([(
            "a".to_string(),
            vec![Err(AdapterError::Parse("bad TEI".into())), ok_artifact()],
        )])));

        run_stage(
            &store,
            &search_def(),
            Arc::clone(&handler) as Arc<dyn StageHandler>,
            &StageSettings::default(),
            &CancelFlag::default(),
        )
        .await
        .unwrap();

        assert_eq!(handler.call_count("a"), 1);
        assert_eq!(
            store.get("a").unwrap().status(StageKind::Search),
            Some(StageStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_skip_action_records_skip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_docs(&dir, &["a"]);
        let handler = Arc::new(ScriptedHandler::new(HashMap::from([(
            "a".to_string(),
            vec![Ok(StageAction::Skip("nothing to do".into()))],
        )])));

        let outcome = run_stage(
            &store,
            &search_def(),
            handler,
            &StageSettings::default(),
            &CancelFlag::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.skipped, 1);
        assert_eq!(
            store.get("a").unwrap().status(StageKind::Search),
            Some(StageStatus::Skipped)
        );
    }

    #[tokio::test]
    async fn test_cancelled_flag_stops_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_docs(&dir, &["a", "b"]);
        let handler = Arc::new(ScriptedHandler::new(HashMap::new()));
        let cancel = CancelFlag::default();
        cancel.cancel();

        let outcome = run_stage(
            &store,
            &search_def(),
            handler,
            &StageSettings::default(),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(outcome.processed, 0);
        assert_eq!(
            store.get("a").unwrap().status(StageKind::Search),
            Some(StageStatus::Pending)
        );
    }
}
