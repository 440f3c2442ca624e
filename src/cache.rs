//! Process-wide cache of course pointers.
//!
//! Populated on read and on save; never refreshed in the background. A miss
//! (or an expired slot) sends the caller to the metadata store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::models::{Pointer, PointerSlot};

#[derive(Debug, Clone)]
struct CachedSlot {
    pointer: Pointer,
    stored_at: Instant,
}

#[derive(Debug, Clone, Default)]
struct CachedPointers {
    published: Option<CachedSlot>,
    draft: Option<CachedSlot>,
}

impl CachedPointers {
    fn slot_mut(&mut self, slot: PointerSlot) -> &mut Option<CachedSlot> {
        match slot {
            PointerSlot::Published => &mut self.published,
            PointerSlot::Draft => &mut self.draft,
        }
    }

    fn slot(&self, slot: PointerSlot) -> Option<&CachedSlot> {
        match slot {
            PointerSlot::Published => self.published.as_ref(),
            PointerSlot::Draft => self.draft.as_ref(),
        }
    }
}

pub struct PointerCache {
    entries: RwLock<HashMap<String, CachedPointers>>,
    ttl: Option<Duration>,
}

impl Default for PointerCache {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PointerCache {
    /// `ttl` of `None` keeps entries for the life of the process.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get_published(&self, course_id: &str) -> Option<Pointer> {
        self.get(course_id, PointerSlot::Published).await
    }

    pub async fn get_draft(&self, course_id: &str) -> Option<Pointer> {
        self.get(course_id, PointerSlot::Draft).await
    }

    /// Draft-preferring lookup.
    pub async fn get_any(&self, course_id: &str) -> Option<Pointer> {
        match self.get_draft(course_id).await {
            Some(pointer) => Some(pointer),
            None => self.get_published(course_id).await,
        }
    }

    /// Stores `pointer` unless the slot already holds a newer version.
    pub async fn update(&self, course_id: &str, slot: PointerSlot, pointer: Pointer) {
        let mut entries = self.entries.write().await;
        let cached = entries.entry(course_id.to_string()).or_default();
        let target = cached.slot_mut(slot);

        if let Some(existing) = target.as_ref() {
            if existing.pointer.version > pointer.version && !self.is_expired(existing) {
                tracing::debug!(
                    "ignoring stale {:?} pointer v{} for {} (cached v{})",
                    slot,
                    pointer.version,
                    course_id,
                    existing.pointer.version
                );
                return;
            }
        }

        *target = Some(CachedSlot {
            pointer,
            stored_at: Instant::now(),
        });
    }

    pub async fn invalidate(&self, course_id: &str) {
        self.entries.write().await.remove(course_id);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    async fn get(&self, course_id: &str, slot: PointerSlot) -> Option<Pointer> {
        let entries = self.entries.read().await;
        let cached = entries.get(course_id)?.slot(slot)?;
        if self.is_expired(cached) {
            return None;
        }
        Some(cached.pointer.clone())
    }

    fn is_expired(&self, slot: &CachedSlot) -> bool {
        self.ttl.is_some_and(|ttl| slot.stored_at.elapsed() >= ttl)
    }
}
