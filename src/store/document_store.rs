use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::StoreError;
use crate::models::{
    Artifact, Document, DocumentMetadata, StageDefinition, StageError, StageKind, StageStatus,
    StageSummary,
};

/// Durable, keyed storage for document records; the single source of truth
/// for corpus membership and stage status.
///
/// Backed by one JSON file rewritten atomically (temp file + rename) on
/// every mutation, so a kill mid-save never truncates the store. All
/// methods are synchronous and take the internal lock only across the
/// in-memory update and the save, never across an await point, which gives
/// the atomicity the eligibility queries require: a reader never observes
/// `done` without the corresponding artifact.
#[derive(Debug)]
pub struct DocumentStore {
    path: PathBuf,
    inner: Mutex<Vec<Document>>,
}

impl DocumentStore {
    /// Open the store at `path`, loading existing records if the file
    /// exists. A record violating the done-iff-artifact invariant fails
    /// the open with `Consistency` - the store is corrupt.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let documents = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let documents: Vec<Document> = serde_json::from_str(&content)?;
            for doc in &documents {
                validate_document(doc)?;
            }
            documents
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Vec::new()
        };

        debug!("Opened store at {:?} with {} documents", path, documents.len());
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(documents),
        })
    }

    /// Insert a new record with all stages pending, or merge metadata into
    /// an existing record without touching its stage state.
    pub fn upsert_metadata(
        &self,
        id: &str,
        metadata: DocumentMetadata,
        sequence: &[StageKind],
    ) -> Result<Document, StoreError> {
        if id.trim().is_empty() {
            return Err(StoreError::Validation("empty document id".into()));
        }

        let mut documents = self.inner.lock().unwrap();
        let doc = match documents.iter_mut().find(|d| d.id == id) {
            Some(existing) => {
                existing.metadata.fill_from(&metadata);
                existing.ensure_stages(sequence);
                existing.clone()
            }
            None => {
                let doc = Document::new(id.to_string(), metadata, sequence);
                documents.push(doc.clone());
                doc
            }
        };
        self.save(&documents)?;
        Ok(doc)
    }

    /// Documents eligible for `stage`, in insertion order: prerequisites
    /// all done, own status pending (or failed, when the stage's retry
    /// policy allows cross-run retry). Returns a snapshot; re-invoke after
    /// partial processing to refresh.
    pub fn get_eligible(&self, stage: &StageDefinition) -> Vec<Document> {
        let documents = self.inner.lock().unwrap();
        documents
            .iter()
            .filter(|doc| {
                let own = match doc.status(stage.kind) {
                    Some(StageStatus::Pending) => true,
                    Some(StageStatus::Failed) => stage.retry.retry_failed,
                    _ => false,
                };
                own && stage
                    .prerequisites
                    .iter()
                    .all(|p| doc.status(*p) == Some(StageStatus::Done))
            })
            .cloned()
            .collect()
    }

    /// Mark a document in-progress for a stage before its adapter call
    pub fn claim(&self, id: &str, stage: StageKind) -> Result<(), StoreError> {
        self.with_slot(id, stage, |slot| {
            slot.status = StageStatus::InProgress;
        })
    }

    /// Record a completed stage: status `done` plus its artifact, in one
    /// atomic update.
    pub fn record_result(
        &self,
        id: &str,
        stage: StageKind,
        artifact: Artifact,
    ) -> Result<(), StoreError> {
        self.with_slot(id, stage, |slot| {
            slot.status = StageStatus::Done;
            slot.artifact = Some(artifact);
            slot.last_error = None;
            slot.skip_reason = None;
        })
    }

    /// Record a per-document stage failure; other documents and stages are
    /// unaffected.
    pub fn record_failure(
        &self,
        id: &str,
        stage: StageKind,
        error: StageError,
    ) -> Result<(), StoreError> {
        self.with_slot(id, stage, |slot| {
            slot.status = StageStatus::Failed;
            slot.last_error = Some(error);
        })
    }

    /// Mark a stage skipped (e.g., the document was excluded by an earlier
    /// screening decision).
    pub fn record_skip(&self, id: &str, stage: StageKind, reason: &str) -> Result<(), StoreError> {
        self.with_slot(id, stage, |slot| {
            slot.status = StageStatus::Skipped;
            slot.skip_reason = Some(reason.to_string());
        })
    }

    /// Reset a failed stage back to pending for an explicit re-queue
    /// (manual remediation path).
    pub fn requeue(&self, id: &str, stage: StageKind) -> Result<(), StoreError> {
        self.with_slot(id, stage, |slot| {
            if slot.status == StageStatus::Failed {
                slot.status = StageStatus::Pending;
            }
        })
    }

    /// Convert any `in_progress` leftovers from a crashed run into
    /// `failed`, making them eligible again under the stage retry policy.
    /// An orphaned in-progress state is never trusted as a completed result.
    pub fn reclaim_interrupted(&self) -> Result<usize, StoreError> {
        let mut documents = self.inner.lock().unwrap();
        let mut reclaimed = 0;
        for doc in documents.iter_mut() {
            for slot in doc.stages.iter_mut() {
                if slot.status == StageStatus::InProgress {
                    slot.status = StageStatus::Failed;
                    slot.last_error = Some(StageError::new(
                        "interrupted",
                        "left in progress by an interrupted run",
                    ));
                    reclaimed += 1;
                }
            }
        }
        if reclaimed > 0 {
            self.save(&documents)?;
        }
        Ok(reclaimed)
    }

    /// Snapshot of all documents in insertion order
    pub fn documents(&self) -> Vec<Document> {
        self.inner.lock().unwrap().clone()
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.inner.lock().unwrap().iter().find(|d| d.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status counts for one stage across the corpus
    pub fn counts(&self, stage: StageKind) -> StageSummary {
        let documents = self.inner.lock().unwrap();
        let mut summary = StageSummary {
            stage: stage.name().to_string(),
            ..Default::default()
        };
        for doc in documents.iter() {
            match doc.status(stage) {
                Some(StageStatus::Done) => summary.done += 1,
                Some(StageStatus::Failed) => summary.failed += 1,
                Some(StageStatus::Skipped) => summary.skipped += 1,
                Some(StageStatus::Pending) => summary.pending += 1,
                Some(StageStatus::InProgress) => summary.in_progress += 1,
                None => {}
            }
        }
        summary
    }

    fn with_slot(
        &self,
        id: &str,
        stage: StageKind,
        update: impl FnOnce(&mut crate::models::StageSlot),
    ) -> Result<(), StoreError> {
        let mut documents = self.inner.lock().unwrap();
        let doc = documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StoreError::UnknownDocument(id.to_string()))?;
        let slot = doc.slot_mut(stage).ok_or_else(|| StoreError::UnknownStage {
            id: id.to_string(),
            stage: stage.name().to_string(),
        })?;
        update(slot);
        self.save(&documents)
    }

    /// Write the store file atomically: serialize to a temp file in the
    /// same directory, then rename over the target.
    fn save(&self, documents: &[Document]) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(documents)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn validate_document(doc: &Document) -> Result<(), StoreError> {
    for slot in &doc.stages {
        let done = slot.status == StageStatus::Done;
        if done && slot.artifact.is_none() {
            return Err(StoreError::Consistency(format!(
                "document {} stage {} is done without an artifact",
                doc.id, slot.stage
            )));
        }
        if !done && slot.artifact.is_some() {
            return Err(StoreError::Consistency(format!(
                "document {} stage {} has an artifact but status is not done",
                doc.id, slot.stage
            )));
        }
    }
    Ok(())
}
