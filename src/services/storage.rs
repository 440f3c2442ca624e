//! Course storage orchestrator.
//!
//! Saves go through an ordered list of tiers (blob store, drive, legacy
//! inline document) and stop at the first one that succeeds. Reads walk a
//! similar list: local registry, metadata pointer + blob, pointer cache,
//! legacy embedded lessons, drive. Students consult the cache before the
//! metadata store.
//!
//! Every metadata-store call is time-boxed. Pointer writes run in their own
//! task; when the budget runs out the caller moves on and the write may still
//! land later. The local registry covers that window.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::blob::BlobStoreClient;
use crate::cache::PointerCache;
use crate::codec;
use crate::config::StorageConfig;
use crate::db::LocalRegistry;
use crate::drive::DriveFallback;
use crate::error::MetaError;
use crate::metadata::{MetadataStore, StoredDocument, WriteCondition};
use crate::models::{
    Course, CourseBlob, CourseMeta, CourseSummary, LegacySnapshot, LocalRegistryEntry, Pointer,
    PointerSlot, SectionCompact, StorageKind, SummarySource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTier {
    Blob,
    Drive,
    Legacy,
}

pub const SAVE_ORDER: [SaveTier; 3] = [SaveTier::Blob, SaveTier::Drive, SaveTier::Legacy];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTier {
    Registry,
    Cache,
    Pointer,
    Legacy,
    Drive,
}

pub const EDITOR_READ_ORDER: [ReadTier; 5] = [
    ReadTier::Registry,
    ReadTier::Pointer,
    ReadTier::Cache,
    ReadTier::Legacy,
    ReadTier::Drive,
];
pub const STUDENT_READ_ORDER: [ReadTier; 5] = [
    ReadTier::Registry,
    ReadTier::Cache,
    ReadTier::Pointer,
    ReadTier::Legacy,
    ReadTier::Drive,
];

/// Which content a read may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadView {
    /// Newest saved content, drafts included.
    Editor,
    /// Published content only.
    Student,
}

#[derive(Debug)]
pub enum TierOutcome<T> {
    Done(T),
    Skipped,
    Failed(String),
}

/// Why a metadata-store call did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaFailure {
    Timeout,
    Quota(String),
    Conflict(String),
    /// The slot already holds a write that started later.
    Superseded(String),
    Other(String),
}

impl From<MetaError> for MetaFailure {
    fn from(err: MetaError) -> Self {
        match err {
            MetaError::QuotaExhausted(msg) => MetaFailure::Quota(msg),
            MetaError::Conflict(msg) => MetaFailure::Conflict(msg),
            MetaError::Superseded(msg) => MetaFailure::Superseded(msg),
            other => MetaFailure::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MetaFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaFailure::Timeout => write!(f, "timed out"),
            MetaFailure::Quota(msg) => write!(f, "quota exhausted ({})", msg),
            MetaFailure::Conflict(msg) => write!(f, "version conflict ({})", msg),
            MetaFailure::Superseded(msg) => write!(f, "superseded ({})", msg),
            MetaFailure::Other(msg) => write!(f, "failed ({})", msg),
        }
    }
}

/// Blob plus the slots that should point at it.
#[derive(Debug, Clone)]
pub(crate) struct PointerTarget {
    pub blob_id: String,
    pub hash: String,
    pub meta: CourseMeta,
    pub sections: Vec<SectionCompact>,
    pub actor: Option<String>,
    pub slots: Vec<PointerSlot>,
    /// When the write was requested. Becomes the pointer timestamp; a slot
    /// holding a later timestamp is left alone.
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
enum DocState {
    #[default]
    Unread,
    Missing,
    Found(StoredDocument),
    Failed,
}

pub struct CourseStorage {
    config: StorageConfig,
    blobs: Option<BlobStoreClient>,
    drive: Option<Arc<DriveFallback>>,
    metadata: Arc<dyn MetadataStore>,
    registry: LocalRegistry,
    cache: Arc<PointerCache>,
}

impl CourseStorage {
    pub fn new(
        config: StorageConfig,
        metadata: Arc<dyn MetadataStore>,
        registry: LocalRegistry,
        cache: Arc<PointerCache>,
    ) -> Self {
        Self {
            config,
            blobs: None,
            drive: None,
            metadata,
            registry,
            cache,
        }
    }

    pub fn with_blob_store(mut self, blobs: BlobStoreClient) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn with_drive(mut self, drive: Arc<DriveFallback>) -> Self {
        self.drive = Some(drive);
        self
    }

    pub fn registry(&self) -> &LocalRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &PointerCache {
        &self.cache
    }

    fn blob_store(&self) -> Option<&BlobStoreClient> {
        self.blobs.as_ref().filter(|_| self.config.blob_store_enabled)
    }

    fn drive(&self) -> Option<&DriveFallback> {
        self.drive.as_deref().filter(|_| self.config.drive_enabled)
    }

    // ---- save ----------------------------------------------------------

    pub async fn save_course(&self, course_id: &str, course: &Course) -> bool {
        self.save_course_as(course_id, course, None).await
    }

    /// Saves a new draft. `actor` is recorded on the pointer.
    pub async fn save_course_as(&self, course_id: &str, course: &Course, actor: Option<&str>) -> bool {
        let saved_at = Utc::now();
        let mut course = course.clone();
        course.id = course_id.to_string();
        let (blob, meta, sections) = codec::encode(&course);

        for tier in SAVE_ORDER {
            let outcome = match tier {
                SaveTier::Blob => {
                    self.save_via_blob(course_id, &blob, &meta, &sections, actor, saved_at)
                        .await
                }
                SaveTier::Drive => self.save_via_drive(course_id, &course).await,
                SaveTier::Legacy => self.save_via_legacy(course_id, &course).await,
            };
            match outcome {
                TierOutcome::Done(()) => {
                    info!("saved course {} via {:?} tier", course_id, tier);
                    return true;
                }
                TierOutcome::Skipped => debug!("save of {}: {:?} tier skipped", course_id, tier),
                TierOutcome::Failed(reason) => {
                    warn!("save of {}: {:?} tier failed: {}", course_id, tier, reason)
                }
            }
        }

        error!("save of course {} failed on every tier", course_id);
        false
    }

    async fn save_via_blob(
        &self,
        course_id: &str,
        blob: &CourseBlob,
        meta: &CourseMeta,
        sections: &[SectionCompact],
        actor: Option<&str>,
        saved_at: DateTime<Utc>,
    ) -> TierOutcome<()> {
        let Some(blobs) = self.blob_store() else {
            return TierOutcome::Skipped;
        };

        let bytes = match codec::to_bytes(blob) {
            Ok(bytes) => bytes,
            Err(e) => return TierOutcome::Failed(format!("encode failed: {}", e)),
        };
        let key = format!("courses/{}/{}", course_id, Utc::now().timestamp_millis());
        let receipt = match blobs.upload(&key, bytes).await {
            Ok(receipt) => receipt,
            Err(e) => return TierOutcome::Failed(format!("blob upload failed: {}", e)),
        };

        let target = PointerTarget {
            blob_id: receipt.file_id.clone(),
            hash: receipt.hash,
            meta: meta.clone(),
            sections: sections.to_vec(),
            actor: actor.map(str::to_string),
            slots: vec![PointerSlot::Draft],
            saved_at,
        };

        match self.write_pointers(course_id, target).await {
            Ok(written) => {
                self.remember(course_id, &written).await;
                self.settle_registry(course_id).await;
                TierOutcome::Done(())
            }
            Err(MetaFailure::Superseded(msg)) => {
                info!("draft of {} left on a later save: {}", course_id, msg);
                TierOutcome::Done(())
            }
            Err(failure) => {
                log_pointer_failure(course_id, &failure);
                match self
                    .registry
                    .add(course_id, &receipt.file_id, meta, sections, true)
                    .await
                {
                    Ok(_) => {
                        info!("course {} recorded in local registry (blob {})", course_id, receipt.file_id);
                        TierOutcome::Done(())
                    }
                    Err(e) => TierOutcome::Failed(format!(
                        "blob {} stored but neither pointer nor registry entry written: {}",
                        receipt.file_id, e
                    )),
                }
            }
        }
    }

    /// After a confirmed draft write: drop the older draft entry, then push a
    /// locally kept publish through while the metadata store is answering.
    async fn settle_registry(&self, course_id: &str) {
        match self.registry.get_pending(course_id).await {
            Ok(Some(draft)) => self.drop_registry_entry(course_id, true, &draft.blob_id).await,
            Ok(None) => {}
            Err(e) => warn!("registry lookup failed for {}: {}", course_id, e),
        }

        let entry = match self.registry.get_published(course_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(e) => {
                warn!("registry lookup failed for {}: {}", course_id, e);
                return;
            }
        };

        let hash = match self.blob_hash(&entry.blob_id).await {
            Ok(hash) => hash,
            Err(reason) => {
                warn!("keeping unconfirmed publish of {}: {}", course_id, reason);
                return;
            }
        };
        let target = PointerTarget {
            blob_id: entry.blob_id.clone(),
            hash,
            meta: entry.meta.clone(),
            sections: entry.sections.clone(),
            actor: None,
            slots: vec![PointerSlot::Published],
            saved_at: entry.created_at,
        };
        match self.write_pointers(course_id, target).await {
            Ok(written) => self.remember(course_id, &written).await,
            Err(MetaFailure::Superseded(msg)) => {
                debug!("local publish of {} already replaced: {}", course_id, msg)
            }
            Err(failure) => {
                warn!("keeping unconfirmed publish of {}: pointer write {}", course_id, failure);
                return;
            }
        }
        self.drop_registry_entry(course_id, false, &entry.blob_id).await;
    }

    async fn drop_registry_entry(&self, course_id: &str, pending_sync: bool, blob_id: &str) {
        if let Err(e) = self.registry.remove_if_blob(course_id, pending_sync, blob_id).await {
            warn!("could not drop registry entry for {}: {}", course_id, e);
        }
    }

    async fn save_via_drive(&self, course_id: &str, course: &Course) -> TierOutcome<()> {
        let Some(drive) = self.drive() else {
            return TierOutcome::Skipped;
        };
        if drive.save(course_id, course).await {
            TierOutcome::Done(())
        } else {
            TierOutcome::Failed("drive save failed".to_string())
        }
    }

    async fn save_via_legacy(&self, course_id: &str, course: &Course) -> TierOutcome<()> {
        let fields = match legacy_fields(course, Utc::now()) {
            Ok(fields) => fields,
            Err(e) => return TierOutcome::Failed(e),
        };

        let metadata = self.metadata.clone();
        let id = course_id.to_string();
        let result = self
            .spawn_bounded(async move { metadata.merge(&id, fields, WriteCondition::Always).await })
            .await;

        match result {
            Ok(()) => {
                self.cache.invalidate(course_id).await;
                TierOutcome::Done(())
            }
            Err(failure) => TierOutcome::Failed(format!("legacy write {}", failure)),
        }
    }

    // ---- reads ---------------------------------------------------------

    /// Editor view: newest saved content, drafts preferred.
    pub async fn get_course(&self, course_id: &str) -> Option<Course> {
        self.resolve(course_id, ReadView::Editor, &EDITOR_READ_ORDER).await
    }

    /// Student view: published content only.
    pub async fn get_published_course(&self, course_id: &str) -> Option<Course> {
        self.resolve(course_id, ReadView::Student, &STUDENT_READ_ORDER).await
    }

    async fn resolve(&self, course_id: &str, view: ReadView, order: &[ReadTier]) -> Option<Course> {
        let mut doc = DocState::Unread;

        for tier in order {
            let outcome = match tier {
                ReadTier::Registry => self.read_registry(course_id, view).await,
                ReadTier::Cache => self.read_cache(course_id, view).await,
                ReadTier::Pointer => self.read_pointer(course_id, view, &mut doc).await,
                ReadTier::Legacy => self.read_legacy(course_id, view, &mut doc).await,
                ReadTier::Drive => self.read_drive(course_id, view).await,
            };
            match outcome {
                TierOutcome::Done(course) => {
                    debug!("read of {} ({:?}) served by {:?} tier", course_id, view, tier);
                    return Some(course);
                }
                TierOutcome::Skipped => {}
                TierOutcome::Failed(reason) => {
                    warn!("read of {} ({:?}): {:?} tier failed: {}", course_id, view, tier, reason)
                }
            }
        }

        debug!("course {} not found ({:?})", course_id, view);
        None
    }

    async fn read_registry(&self, course_id: &str, view: ReadView) -> TierOutcome<Course> {
        let lookup = match view {
            ReadView::Editor => self.registry.get(course_id).await,
            // Pending entries are unpublished drafts.
            ReadView::Student => self.registry.get_published(course_id).await,
        };
        let entry = match lookup {
            Ok(Some(entry)) => entry,
            Ok(None) => return TierOutcome::Skipped,
            Err(e) => return TierOutcome::Failed(format!("registry lookup failed: {}", e)),
        };
        if view == ReadView::Editor && !entry.pending_sync {
            // A draft confirmed after the local publish is newer content.
            let newer_draft = self
                .cache
                .get_draft(course_id)
                .await
                .is_some_and(|draft| draft.timestamp > entry.created_at);
            if newer_draft {
                return TierOutcome::Skipped;
            }
        }

        match self.load_blob(course_id, &entry.blob_id, entry.meta.clone(), entry.sections.clone()).await {
            Ok(mut course) => {
                course.published = !entry.pending_sync;
                course.is_draft = entry.pending_sync;
                course.dirty = entry.pending_sync;
                course.updated_at = Some(entry.created_at);
                TierOutcome::Done(course)
            }
            Err(reason) => TierOutcome::Failed(reason),
        }
    }

    async fn read_cache(&self, course_id: &str, view: ReadView) -> TierOutcome<Course> {
        let pointer = match view {
            ReadView::Student => self.cache.get_published(course_id).await,
            ReadView::Editor => self.cache.get_any(course_id).await,
        };
        let Some(pointer) = pointer else {
            return TierOutcome::Skipped;
        };

        match self.load_blob(course_id, &pointer.blob_id, pointer.meta.clone(), pointer.sections.clone()).await {
            Ok(mut course) => {
                course.updated_at = Some(pointer.timestamp);
                match view {
                    ReadView::Editor => {
                        let published = self.cache.get_published(course_id).await;
                        course.published = published.is_some();
                        course.is_draft = published.is_none_or(|p| p.blob_id != pointer.blob_id);
                        course.dirty = course.is_draft;
                    }
                    ReadView::Student => course.published = true,
                }
                TierOutcome::Done(course)
            }
            Err(reason) => {
                // A pointer whose blob cannot be read is no use to the next reader either.
                self.cache.invalidate(course_id).await;
                TierOutcome::Failed(reason)
            }
        }
    }

    async fn read_pointer(&self, course_id: &str, view: ReadView, doc: &mut DocState) -> TierOutcome<Course> {
        let stored = match self.document(course_id, doc).await {
            Some(stored) => stored,
            None => return TierOutcome::Skipped,
        };

        let selected = match view {
            ReadView::Editor => stored.doc.editor_pointer(),
            ReadView::Student => stored.doc.published.as_ref().map(|p| (PointerSlot::Published, p)),
        };
        let Some((slot, pointer)) = selected else {
            return TierOutcome::Skipped;
        };

        for (slot, pointer) in [
            (PointerSlot::Published, stored.doc.published.as_ref()),
            (PointerSlot::Draft, stored.doc.draft_snapshot.as_ref()),
        ] {
            if let Some(pointer) = pointer {
                self.cache.update(course_id, slot, pointer.clone()).await;
            }
        }

        match self.load_blob(course_id, &pointer.blob_id, pointer.meta.clone(), pointer.sections.clone()).await {
            Ok(mut course) => {
                course.created_at = stored.doc.created_at;
                course.updated_at = Some(pointer.timestamp);
                match view {
                    ReadView::Editor => {
                        course.published = stored.doc.is_published;
                        course.is_draft = slot == PointerSlot::Draft;
                        course.dirty = stored.doc.dirty;
                    }
                    ReadView::Student => course.published = true,
                }
                TierOutcome::Done(course)
            }
            Err(reason) => TierOutcome::Failed(reason),
        }
    }

    async fn read_legacy(&self, course_id: &str, view: ReadView, doc: &mut DocState) -> TierOutcome<Course> {
        if matches!(doc, DocState::Failed) {
            return TierOutcome::Failed("metadata store unavailable".to_string());
        }
        let Some(stored) = self.document(course_id, doc).await else {
            return TierOutcome::Skipped;
        };
        if view == ReadView::Student && !stored.doc.is_published {
            return TierOutcome::Skipped;
        }

        let mut lessons = stored.doc.lessons.clone();
        if lessons.is_empty() {
            let metadata = self.metadata.clone();
            let id = course_id.to_string();
            lessons = match self.bounded(async move { metadata.legacy_lessons(&id).await }).await {
                Ok(lessons) => lessons,
                Err(failure) => return TierOutcome::Failed(format!("legacy lessons {}", failure)),
            };
        }
        if lessons.is_empty() {
            return TierOutcome::Skipped;
        }

        // Students keep the pre-migration meta once a blob draft has replaced it.
        let (meta, sections) = match (&stored.doc.legacy_published, view) {
            (Some(snapshot), ReadView::Student) => (snapshot.meta.clone(), snapshot.sections.clone()),
            _ => (stored.doc.meta.clone(), stored.doc.sections.clone()),
        };

        let mut course = Course {
            id: course_id.to_string(),
            lessons,
            sections,
            published: stored.doc.is_published,
            created_at: stored.doc.created_at,
            updated_at: stored.doc.updated_at,
            dirty: view == ReadView::Editor && stored.doc.dirty,
            ..Default::default()
        };
        course.apply_meta(meta);
        TierOutcome::Done(course)
    }

    async fn read_drive(&self, course_id: &str, view: ReadView) -> TierOutcome<Course> {
        let Some(drive) = self.drive() else {
            return TierOutcome::Skipped;
        };
        match drive.get(course_id).await {
            Some(course) if view == ReadView::Student && !course.published => TierOutcome::Skipped,
            Some(course) => TierOutcome::Done(course),
            None => TierOutcome::Skipped,
        }
    }

    /// Reads the metadata document once per request.
    async fn document(&self, course_id: &str, doc: &mut DocState) -> Option<StoredDocument> {
        if matches!(doc, DocState::Unread) {
            let metadata = self.metadata.clone();
            let id = course_id.to_string();
            *doc = match self.bounded(async move { metadata.get(&id).await }).await {
                Ok(Some(stored)) => DocState::Found(stored),
                Ok(None) => DocState::Missing,
                Err(failure) => {
                    warn!("metadata read for {} {}", course_id, failure);
                    DocState::Failed
                }
            };
        }
        match doc {
            DocState::Found(stored) => Some(stored.clone()),
            _ => None,
        }
    }

    async fn load_blob(
        &self,
        course_id: &str,
        blob_id: &str,
        meta: CourseMeta,
        sections: Vec<SectionCompact>,
    ) -> Result<Course, String> {
        let blobs = self
            .blobs
            .as_ref()
            .ok_or_else(|| "no blob store configured".to_string())?;
        let bytes = blobs
            .download(blob_id)
            .await
            .map_err(|e| format!("blob {} download failed: {}", blob_id, e))?
            .ok_or_else(|| format!("blob {} not found", blob_id))?;
        let blob = codec::from_bytes(&bytes).map_err(|e| format!("blob {} unreadable: {}", blob_id, e))?;
        codec::decode(course_id, meta, sections, &blob).map_err(|e| format!("blob {} undecodable: {}", blob_id, e))
    }

    // ---- list / delete -------------------------------------------------

    /// Registry entries first, then metadata documents; registry wins on duplicate IDs.
    pub async fn list_courses(&self) -> Vec<CourseSummary> {
        let mut summaries = match self.registry.get_all().await {
            Ok(entries) => registry_summaries(&entries),
            Err(e) => {
                warn!("registry listing failed: {}", e);
                Vec::new()
            }
        };

        let metadata = self.metadata.clone();
        match self.bounded(async move { metadata.list().await }).await {
            Ok(documents) => {
                for stored in documents {
                    if summaries.iter().any(|s| s.id == stored.id) {
                        continue;
                    }
                    summaries.push(document_summary(&stored));
                }
            }
            Err(failure) => warn!("metadata listing {}; serving registry entries only", failure),
        }

        if self.blob_store().is_none() {
            if let Some(drive) = self.drive() {
                for course in drive.list().await {
                    if summaries.iter().any(|s| s.id == course.id) {
                        continue;
                    }
                    summaries.push(drive_summary(&course));
                }
            }
        }

        summaries
    }

    pub async fn delete_course(&self, course_id: &str) -> bool {
        if let Err(e) = self.registry.remove(course_id).await {
            warn!("registry removal failed for {}: {}", course_id, e);
        }
        self.cache.invalidate(course_id).await;

        if let Some(drive) = self.drive() {
            if !drive.delete(course_id).await {
                warn!("drive copy of {} could not be deleted", course_id);
            }
        }

        let metadata = self.metadata.clone();
        let id = course_id.to_string();
        match self.spawn_bounded(async move { metadata.delete(&id).await }).await {
            Ok(()) => {
                info!("deleted course {}", course_id);
                true
            }
            Err(failure @ (MetaFailure::Quota(_) | MetaFailure::Timeout)) => {
                warn!(
                    "metadata delete for {} {}; local copies removed, stale document left in place",
                    course_id, failure
                );
                true
            }
            Err(failure) => {
                error!("metadata delete for {} {}", course_id, failure);
                false
            }
        }
    }

    // ---- publish -------------------------------------------------------

    /// Promotes the newest draft to the published slot.
    pub async fn publish_course(&self, course_id: &str, publisher: Option<&str>) -> bool {
        let saved_at = Utc::now();
        let pending = match self.registry.get_pending(course_id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("registry lookup failed for {}: {}", course_id, e);
                None
            }
        };
        let local_publish = match self.registry.get_published(course_id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("registry lookup failed for {}: {}", course_id, e);
                None
            }
        };

        let target = match pending.as_ref().or(local_publish.as_ref()) {
            Some(entry) => {
                let hash = match self.blob_hash(&entry.blob_id).await {
                    Ok(hash) => hash,
                    Err(reason) => {
                        error!("cannot publish {}: {}", course_id, reason);
                        return false;
                    }
                };
                // Only an unconfirmed draft also owns the draft slot.
                let slots = if entry.pending_sync {
                    vec![PointerSlot::Published, PointerSlot::Draft]
                } else {
                    vec![PointerSlot::Published]
                };
                PointerTarget {
                    blob_id: entry.blob_id.clone(),
                    hash,
                    meta: entry.meta.clone(),
                    sections: entry.sections.clone(),
                    actor: publisher.map(str::to_string),
                    slots,
                    saved_at,
                }
            }
            None => {
                let mut doc = DocState::Unread;
                let draft = match self.document(course_id, &mut doc).await {
                    Some(stored) => {
                        let Some(draft) = stored.doc.draft_snapshot.clone() else {
                            warn!("cannot publish {}: no draft snapshot", course_id);
                            return false;
                        };
                        if !stored.doc.dirty
                            && stored.doc.published.as_ref().is_some_and(|p| p.blob_id == draft.blob_id)
                        {
                            debug!("course {} already published at blob {}", course_id, draft.blob_id);
                            return true;
                        }
                        draft
                    }
                    // Metadata store unreachable: the last draft this process saw.
                    None if matches!(doc, DocState::Failed) => match self.cache.get_draft(course_id).await {
                        Some(draft) => draft,
                        None => {
                            warn!("cannot publish {}: metadata unavailable and no cached draft", course_id);
                            return false;
                        }
                    },
                    None => {
                        warn!("cannot publish {}: no metadata document", course_id);
                        return false;
                    }
                };
                PointerTarget {
                    blob_id: draft.blob_id,
                    hash: draft.hash,
                    meta: draft.meta,
                    sections: draft.sections,
                    actor: publisher.map(str::to_string),
                    slots: vec![PointerSlot::Published],
                    saved_at,
                }
            }
        };

        let blob_id = target.blob_id.clone();
        let meta = target.meta.clone();
        let sections = target.sections.clone();

        match self.write_pointers(course_id, target).await {
            Ok(written) => {
                self.remember(course_id, &written).await;
                if pending.as_ref().is_some_and(|entry| entry.blob_id == blob_id) {
                    self.drop_registry_entry(course_id, true, &blob_id).await;
                }
                if let Some(entry) = &local_publish {
                    self.drop_registry_entry(course_id, false, &entry.blob_id).await;
                }
                info!("published course {} (blob {})", course_id, blob_id);
                true
            }
            Err(MetaFailure::Superseded(msg)) => {
                warn!("publish of {} not applied: {}", course_id, msg);
                false
            }
            Err(failure) => {
                log_pointer_failure(course_id, &failure);
                match self.registry.add(course_id, &blob_id, &meta, &sections, false).await {
                    Ok(_) => {
                        info!("course {} published locally via registry (blob {})", course_id, blob_id);
                        true
                    }
                    Err(e) => {
                        error!("publish of {} lost: {}", course_id, e);
                        false
                    }
                }
            }
        }
    }

    // ---- pointer writes ------------------------------------------------

    /// Time-boxed pointer write. The write keeps running if the budget is spent.
    pub(crate) async fn write_pointers(
        &self,
        course_id: &str,
        target: PointerTarget,
    ) -> Result<Vec<(PointerSlot, Pointer)>, MetaFailure> {
        let metadata = self.metadata.clone();
        let id = course_id.to_string();
        self.spawn_bounded(async move { commit_pointers(metadata.as_ref(), &id, &target).await })
            .await
    }

    pub(crate) async fn remember(&self, course_id: &str, written: &[(PointerSlot, Pointer)]) {
        for (slot, pointer) in written {
            self.cache.update(course_id, *slot, pointer.clone()).await;
        }
    }

    /// Current metadata document, time-boxed. `Err` when the store did not answer.
    pub(crate) async fn current_document(&self, course_id: &str) -> Result<Option<StoredDocument>, MetaFailure> {
        let metadata = self.metadata.clone();
        let id = course_id.to_string();
        self.bounded(async move { metadata.get(&id).await }).await
    }

    /// Content hash of a stored blob; also proves the blob is still readable.
    pub(crate) async fn blob_hash(&self, blob_id: &str) -> Result<String, String> {
        let blobs = self
            .blobs
            .as_ref()
            .ok_or_else(|| "no blob store configured".to_string())?;
        let bytes = blobs
            .download(blob_id)
            .await
            .map_err(|e| format!("blob {} download failed: {}", blob_id, e))?
            .ok_or_else(|| format!("blob {} not found", blob_id))?;
        Ok(codec::sha256_hex(&bytes))
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, MetaFailure>
    where
        F: Future<Output = Result<T, MetaError>>,
    {
        match tokio::time::timeout(self.config.metadata_timeout, fut).await {
            Ok(result) => result.map_err(MetaFailure::from),
            Err(_) => Err(MetaFailure::Timeout),
        }
    }

    async fn spawn_bounded<T, F>(&self, fut: F) -> Result<T, MetaFailure>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, MetaError>> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        match tokio::time::timeout(self.config.metadata_timeout, handle).await {
            Ok(Ok(result)) => result.map_err(MetaFailure::from),
            Ok(Err(join_error)) => Err(MetaFailure::Other(format!("write task aborted: {}", join_error))),
            Err(_) => Err(MetaFailure::Timeout),
        }
    }
}

/// Read-modify-write of the pointer slots, guarded by the document's update
/// time. One retry on a lost race. Refuses to move a slot whose pointer was
/// written for a later request.
pub(crate) async fn commit_pointers(
    store: &dyn MetadataStore,
    course_id: &str,
    target: &PointerTarget,
) -> Result<Vec<(PointerSlot, Pointer)>, MetaError> {
    let mut attempt = 0;
    loop {
        let current = store.get(course_id).await?;
        let condition = match &current {
            Some(stored) => WriteCondition::UpdatedAt(stored.update_time.clone()),
            None => WriteCondition::Absent,
        };
        let doc = current.map(|stored| stored.doc);
        let now = Utc::now();

        for slot in &target.slots {
            if let Some(existing) = doc.as_ref().and_then(|d| d.pointer(*slot)) {
                if existing.timestamp > target.saved_at {
                    return Err(MetaError::Superseded(format!(
                        "{} of {} was written for {} (this write: {})",
                        slot.field(),
                        course_id,
                        existing.timestamp,
                        target.saved_at
                    )));
                }
            }
        }

        let touches_draft = target.slots.contains(&PointerSlot::Draft);
        let touches_published = target.slots.contains(&PointerSlot::Published);

        let mut fields = Map::new();
        if touches_draft {
            fields = meta_fields(&target.meta).map_err(MetaError::Decode)?;
            fields.insert(
                "sections".to_string(),
                to_json(&target.sections).map_err(MetaError::Decode)?,
            );
            // Top-level meta is about to become draft meta.
            if let Some(live) = doc
                .as_ref()
                .filter(|d| d.is_legacy_published() && d.legacy_published.is_none())
            {
                let snapshot = LegacySnapshot {
                    meta: live.meta.clone(),
                    sections: live.sections.clone(),
                };
                fields.insert(
                    "legacy_published".to_string(),
                    to_json(&snapshot).map_err(MetaError::Decode)?,
                );
            }
        }

        let mut written = Vec::with_capacity(target.slots.len());
        for slot in &target.slots {
            let previous = doc
                .as_ref()
                .and_then(|d| d.pointer(*slot))
                .map(|p| p.version)
                .unwrap_or(0);
            let pointer = Pointer {
                blob_id: target.blob_id.clone(),
                version: previous + 1,
                hash: target.hash.clone(),
                meta: target.meta.clone(),
                sections: target.sections.clone(),
                timestamp: target.saved_at,
                actor: target.actor.clone(),
            };
            fields.insert(slot.field().to_string(), to_json(&pointer).map_err(MetaError::Decode)?);
            written.push((*slot, pointer));
        }

        let dirty = if touches_draft {
            !touches_published
        } else {
            doc.as_ref()
                .and_then(|d| d.draft_snapshot.as_ref())
                .is_some_and(|draft| draft.blob_id != target.blob_id)
        };
        fields.insert("dirty".to_string(), Value::Bool(dirty));
        if touches_published {
            fields.insert("is_published".to_string(), Value::Bool(true));
        }
        fields.insert("storage".to_string(), to_json(&StorageKind::Blob).map_err(MetaError::Decode)?);
        fields.insert("updated_at".to_string(), to_json(&now).map_err(MetaError::Decode)?);
        if doc.as_ref().and_then(|d| d.created_at).is_none() {
            fields.insert("created_at".to_string(), to_json(&now).map_err(MetaError::Decode)?);
        }

        match store.merge(course_id, fields, condition).await {
            Ok(()) => return Ok(written),
            Err(MetaError::Conflict(msg)) if attempt == 0 => {
                debug!("pointer write for {} lost a race ({}), retrying", course_id, msg);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn log_pointer_failure(course_id: &str, failure: &MetaFailure) {
    match failure {
        MetaFailure::Timeout => warn!(
            "pointer write for {} timed out; falling back to local registry",
            course_id
        ),
        MetaFailure::Quota(msg) => warn!(
            "pointer write for {} hit metadata quota ({}); falling back to local registry",
            course_id, msg
        ),
        MetaFailure::Conflict(msg) => warn!(
            "pointer write for {} kept conflicting ({}); falling back to local registry",
            course_id, msg
        ),
        MetaFailure::Superseded(msg) => debug!("pointer write for {} skipped: {}", course_id, msg),
        MetaFailure::Other(msg) => warn!(
            "pointer write for {} failed ({}); falling back to local registry",
            course_id, msg
        ),
    }
}

fn meta_fields(meta: &CourseMeta) -> Result<Map<String, Value>, String> {
    match serde_json::to_value(meta) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("course meta did not serialize to an object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Full inline document for the legacy tier.
fn legacy_fields(course: &Course, now: DateTime<Utc>) -> Result<Map<String, Value>, String> {
    let mut fields = meta_fields(&course.meta())?;
    fields.insert("lessons".to_string(), to_json(&course.lessons)?);
    fields.insert("sections".to_string(), to_json(&course.sections)?);
    fields.insert("storage".to_string(), to_json(&StorageKind::Legacy)?);
    fields.insert("is_published".to_string(), Value::Bool(course.published));
    fields.insert("dirty".to_string(), Value::Bool(true));
    // Inline content is now newer than any draft blob or captured meta.
    fields.insert("draft_snapshot".to_string(), Value::Null);
    fields.insert("legacy_published".to_string(), Value::Null);
    fields.insert("updated_at".to_string(), to_json(&now)?);
    fields.insert("created_at".to_string(), to_json(&course.created_at.unwrap_or(now))?);
    Ok(fields)
}

/// One summary per course; a draft entry and a local publish fold together.
fn registry_summaries(entries: &[LocalRegistryEntry]) -> Vec<CourseSummary> {
    let mut summaries: Vec<CourseSummary> = Vec::new();
    for entry in entries {
        match summaries.iter_mut().find(|s| s.id == entry.course_id) {
            Some(summary) => {
                if entry.pending_sync {
                    summary.meta = entry.meta.clone();
                    summary.section_count = entry.sections.len();
                }
                summary.is_published |= !entry.pending_sync;
                summary.has_draft |= entry.pending_sync;
                summary.pending_sync |= entry.pending_sync;
                summary.updated_at = summary.updated_at.max(Some(entry.created_at));
            }
            None => summaries.push(registry_summary(entry)),
        }
    }
    summaries
}

fn registry_summary(entry: &LocalRegistryEntry) -> CourseSummary {
    CourseSummary {
        id: entry.course_id.clone(),
        meta: entry.meta.clone(),
        section_count: entry.sections.len(),
        is_published: !entry.pending_sync,
        has_draft: entry.pending_sync,
        pending_sync: entry.pending_sync,
        updated_at: Some(entry.created_at),
        source: SummarySource::Registry,
    }
}

fn document_summary(stored: &StoredDocument) -> CourseSummary {
    CourseSummary {
        id: stored.id.clone(),
        meta: stored.doc.meta.clone(),
        section_count: stored.doc.sections.len(),
        is_published: stored.doc.is_published,
        has_draft: stored.doc.draft_snapshot.is_some() && stored.doc.dirty,
        pending_sync: false,
        updated_at: stored.doc.updated_at,
        source: SummarySource::Metadata,
    }
}

fn drive_summary(course: &Course) -> CourseSummary {
    CourseSummary {
        id: course.id.clone(),
        meta: course.meta(),
        section_count: course.sections.len(),
        is_published: course.published,
        has_draft: false,
        pending_sync: false,
        updated_at: course.updated_at,
        source: SummarySource::Drive,
    }
}
