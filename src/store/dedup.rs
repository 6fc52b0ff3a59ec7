use std::collections::HashMap;

use tracing::warn;

use crate::error::StoreError;
use crate::models::{RawRecord, StageKind};
use crate::store::DocumentStore;

/// Outcome of ingesting one metadata batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupReport {
    /// Records that created a new store entry
    pub created: usize,
    /// Records merged into an existing entry (in the store or earlier in
    /// the same batch)
    pub merged: usize,
    /// Records with neither an identifier nor a usable title, dropped
    pub discarded: usize,
}

/// Merge a batch of freshly retrieved metadata into the store, producing
/// exactly one entry per distinct logical document.
///
/// Matching is by external identifier first, then by a normalized
/// title/author fingerprint for sources that omit the identifier. Merge
/// policy lives in `DocumentMetadata::fill_from`: first-seen wins for
/// populated fields, later records only fill gaps. Deterministic for a
/// fixed input order.
pub fn ingest_batch(
    store: &DocumentStore,
    batch: Vec<RawRecord>,
    sequence: &[StageKind],
) -> Result<DedupReport, StoreError> {
    // Seed the key index from what the store already holds
    let mut by_key: HashMap<String, String> = HashMap::new();
    for doc in store.documents() {
        by_key.insert(id_key(&doc.id), doc.id.clone());
        if let Some(fp) = fingerprint(
            doc.metadata.title.as_deref(),
            &doc.metadata.authors,
        ) {
            by_key.entry(fp).or_insert(doc.id.clone());
        }
    }

    let mut report = DedupReport::default();
    for record in batch {
        let fp = fingerprint(record.metadata.title.as_deref(), &record.metadata.authors);

        let existing = record
            .external_id
            .as_deref()
            .and_then(|id| by_key.get(&id_key(id)))
            .or_else(|| fp.as_ref().and_then(|fp| by_key.get(fp)))
            .cloned();

        let (target_id, is_new) = match existing {
            Some(id) => (id, false),
            None => match (&record.external_id, &fp) {
                (Some(id), _) => (id.clone(), true),
                // No identifier: the fingerprint itself becomes the stable id
                (None, Some(fp)) => (format!("fp:{fp}"), true),
                (None, None) => {
                    warn!("Discarding record with no identifier and no title");
                    report.discarded += 1;
                    continue;
                }
            },
        };

        store.upsert_metadata(&target_id, record.metadata, sequence)?;
        if is_new {
            report.created += 1;
            by_key.insert(id_key(&target_id), target_id.clone());
            if let Some(fp) = fp {
                by_key.entry(fp).or_insert(target_id.clone());
            }
        } else {
            report.merged += 1;
        }
    }

    Ok(report)
}

fn id_key(id: &str) -> String {
    format!("id:{id}")
}

/// Normalized title + author-list key: lowercase, alphanumerics only,
/// single-space separated. None when there is no usable title.
fn fingerprint(title: Option<&str>, authors: &[String]) -> Option<String> {
    let title = normalize(title?);
    if title.is_empty() {
        return None;
    }
    let authors: Vec<String> = authors.iter().map(|a| normalize(a)).collect();
    Some(format!("{}|{}", title, authors.join(";")))
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
