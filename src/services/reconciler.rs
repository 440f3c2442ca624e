use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::models::{CourseDocument, LocalRegistryEntry, PointerSlot};
use crate::services::storage::{CourseStorage, MetaFailure, PointerTarget};

/// Replays local registry entries into the metadata store.
pub struct RegistryReconciler {
    storage: Arc<CourseStorage>,
}

#[derive(Debug, Default, Serialize)]
pub struct ReconcileStats {
    pub drafts_confirmed: usize,
    pub publishes_confirmed: usize,
    pub already_landed: usize,
    pub superseded: usize,
    pub failed: usize,
}

enum EntryOutcome {
    Written,
    AlreadyLanded,
    Superseded,
    Failed,
}

impl RegistryReconciler {
    pub fn new(storage: Arc<CourseStorage>) -> Self {
        Self { storage }
    }

    pub async fn reconcile_all(&self) -> Result<ReconcileStats, AppError> {
        let entries = self.storage.registry().get_all().await?;
        let mut stats = ReconcileStats::default();
        if entries.is_empty() {
            debug!("Local registry empty, nothing to reconcile");
            return Ok(stats);
        }

        info!("Reconciling {} local registry entries", entries.len());
        for entry in entries {
            match self.reconcile_entry(&entry).await {
                EntryOutcome::Written if entry.pending_sync => stats.drafts_confirmed += 1,
                EntryOutcome::Written => stats.publishes_confirmed += 1,
                EntryOutcome::AlreadyLanded => stats.already_landed += 1,
                EntryOutcome::Superseded => stats.superseded += 1,
                EntryOutcome::Failed => stats.failed += 1,
            }
        }

        info!("Reconcile finished: {:?}", stats);
        Ok(stats)
    }

    async fn reconcile_entry(&self, entry: &LocalRegistryEntry) -> EntryOutcome {
        let course_id = entry.course_id.as_str();

        let doc = match self.storage.current_document(course_id).await {
            Ok(doc) => doc,
            Err(failure) => {
                warn!("Skipping {}: metadata read {}", course_id, failure);
                return EntryOutcome::Failed;
            }
        };

        let slots = if entry.pending_sync {
            vec![PointerSlot::Draft]
        } else if self.needs_draft_slot(entry, doc.as_ref().map(|d| &d.doc)).await {
            vec![PointerSlot::Published, PointerSlot::Draft]
        } else {
            vec![PointerSlot::Published]
        };

        if let Some(stored) = &doc {
            // A timed-out write may have landed after all.
            let landed = slots.iter().all(|slot| {
                stored
                    .doc
                    .pointer(*slot)
                    .is_some_and(|p| p.blob_id == entry.blob_id)
            });
            if landed {
                self.drop_entry(entry).await;
                return EntryOutcome::AlreadyLanded;
            }

            let newer_draft = stored
                .doc
                .draft_snapshot
                .as_ref()
                .is_some_and(|p| p.timestamp > entry.created_at);
            if entry.pending_sync && newer_draft {
                self.drop_entry(entry).await;
                return EntryOutcome::Superseded;
            }
        }

        let hash = match self.storage.blob_hash(&entry.blob_id).await {
            Ok(hash) => hash,
            Err(reason) => {
                warn!("Skipping {}: {}", course_id, reason);
                return EntryOutcome::Failed;
            }
        };

        let target = PointerTarget {
            blob_id: entry.blob_id.clone(),
            hash,
            meta: entry.meta.clone(),
            sections: entry.sections.clone(),
            actor: None,
            slots,
            saved_at: entry.created_at,
        };

        match self.storage.write_pointers(course_id, target).await {
            Ok(written) => {
                self.storage.remember(course_id, &written).await;
                self.drop_entry(entry).await;
                info!("Reconciled {} (blob {})", course_id, entry.blob_id);
                EntryOutcome::Written
            }
            Err(MetaFailure::Superseded(msg)) => {
                debug!("Dropping {} entry: {}", course_id, msg);
                self.drop_entry(entry).await;
                EntryOutcome::Superseded
            }
            Err(failure) => {
                warn!("Pointer write for {} {}, keeping registry entry", course_id, failure);
                EntryOutcome::Failed
            }
        }
    }

    /// A local publish also fills the draft slot when the document has no
    /// draft and no unconfirmed draft is waiting its turn.
    async fn needs_draft_slot(&self, entry: &LocalRegistryEntry, doc: Option<&CourseDocument>) -> bool {
        if doc.is_some_and(|d| d.draft_snapshot.is_some()) {
            return false;
        }
        match self.storage.registry().get_pending(&entry.course_id).await {
            Ok(pending) => pending.is_none(),
            Err(e) => {
                warn!("Registry lookup failed for {}: {}", entry.course_id, e);
                false
            }
        }
    }

    async fn drop_entry(&self, entry: &LocalRegistryEntry) {
        if let Err(e) = self
            .storage
            .registry()
            .remove_if_blob(&entry.course_id, entry.pending_sync, &entry.blob_id)
            .await
        {
            warn!("Could not remove registry entry for {}: {}", entry.course_id, e);
        }
    }
}
