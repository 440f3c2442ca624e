use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::compact::{CourseMeta, SectionCompact};
use super::course::Lesson;
use super::pointer::{Pointer, PointerSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Blob,
    Legacy,
}

/// A course document in the metadata store.
///
/// Blob-backed courses carry pointers; pre-migration courses carry their
/// lessons inline (or in a `lessons` subcollection) and no pointers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseDocument {
    #[serde(flatten)]
    pub meta: CourseMeta,
    #[serde(default)]
    pub sections: Vec<SectionCompact>,
    #[serde(default)]
    pub published: Option<Pointer>,
    #[serde(default)]
    pub draft_snapshot: Option<Pointer>,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub storage: Option<StorageKind>,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    /// Published meta of a pre-migration course, captured before the first
    /// blob draft overwrote the top-level fields.
    #[serde(default)]
    pub legacy_published: Option<LegacySnapshot>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacySnapshot {
    pub meta: CourseMeta,
    #[serde(default)]
    pub sections: Vec<SectionCompact>,
}

impl CourseDocument {
    pub fn pointer(&self, slot: PointerSlot) -> Option<&Pointer> {
        match slot {
            PointerSlot::Published => self.published.as_ref(),
            PointerSlot::Draft => self.draft_snapshot.as_ref(),
        }
    }

    /// Inline content that was live before any blob pointer existed.
    pub fn is_legacy_published(&self) -> bool {
        self.is_published && self.published.is_none()
    }

    /// Draft-preferring pointer, as editors see it.
    pub fn editor_pointer(&self) -> Option<(PointerSlot, &Pointer)> {
        self.draft_snapshot
            .as_ref()
            .map(|p| (PointerSlot::Draft, p))
            .or_else(|| self.published.as_ref().map(|p| (PointerSlot::Published, p)))
    }
}

/// Write-ahead record kept when a blob landed but its pointer did not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRegistryEntry {
    pub course_id: String,
    pub blob_id: String,
    pub meta: CourseMeta,
    pub sections: Vec<SectionCompact>,
    pub created_at: DateTime<Utc>,
    pub pending_sync: bool,
}
