//! Document store holding course metadata and pointers.

pub mod dto;
pub mod firestore;

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::MetaError;
use crate::models::{CourseDocument, Lesson};

pub use firestore::{FirestoreClient, FirestoreConfig};

/// Precondition attached to a merge write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    Always,
    /// The document must not exist yet.
    Absent,
    /// The document must still carry this update time.
    UpdatedAt(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub doc: CourseDocument,
    pub update_time: String,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, course_id: &str) -> Result<Option<StoredDocument>, MetaError>;
    /// Merges top-level fields into the document, creating it when absent.
    async fn merge(
        &self,
        course_id: &str,
        fields: Map<String, Value>,
        condition: WriteCondition,
    ) -> Result<(), MetaError>;
    async fn list(&self) -> Result<Vec<StoredDocument>, MetaError>;
    async fn delete(&self, course_id: &str) -> Result<(), MetaError>;
    /// Lessons kept in the pre-migration `lessons` subcollection.
    async fn legacy_lessons(&self, course_id: &str) -> Result<Vec<Lesson>, MetaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Quota,
    Transport,
}

#[derive(Debug, Clone, Copy, Default)]
struct FaultPlan {
    fault: Option<Fault>,
    latency: Duration,
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    docs: RwLock<HashMap<String, (Map<String, Value>, u64)>>,
    lessons: RwLock<HashMap<String, Vec<Lesson>>>,
    plan: Mutex<FaultPlan>,
    revision: AtomicU64,
    calls: AtomicUsize,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every following call fails with `fault` (or succeeds again with `None`).
    pub fn set_fault(&self, fault: Option<Fault>) {
        if let Ok(mut plan) = self.plan.lock() {
            plan.fault = fault;
        }
    }

    /// Delay applied before every call takes effect.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut plan) = self.plan.lock() {
            plan.latency = latency;
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Seeds a raw document, e.g. a pre-migration course.
    pub async fn insert_raw(&self, course_id: &str, doc: Value) {
        let fields = match doc {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let rev = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.docs.write().await.insert(course_id.to_string(), (fields, rev));
    }

    pub async fn insert_legacy_lessons(&self, course_id: &str, lessons: Vec<Lesson>) {
        self.lessons.write().await.insert(course_id.to_string(), lessons);
    }

    async fn enter(&self) -> Result<(), MetaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let plan = self.plan.lock().map(|p| *p).unwrap_or_default();
        if !plan.latency.is_zero() {
            tokio::time::sleep(plan.latency).await;
        }
        match plan.fault {
            Some(Fault::Quota) => Err(MetaError::QuotaExhausted("RESOURCE_EXHAUSTED".to_string())),
            Some(Fault::Transport) => Err(MetaError::Transport("connection refused".to_string())),
            None => Ok(()),
        }
    }

    fn stored(id: &str, fields: &Map<String, Value>, rev: u64) -> Result<StoredDocument, MetaError> {
        let doc: CourseDocument = serde_json::from_value(Value::Object(fields.clone()))?;
        Ok(StoredDocument {
            id: id.to_string(),
            doc,
            update_time: rev.to_string(),
        })
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get(&self, course_id: &str) -> Result<Option<StoredDocument>, MetaError> {
        self.enter().await?;
        match self.docs.read().await.get(course_id) {
            Some((fields, rev)) => Ok(Some(Self::stored(course_id, fields, *rev)?)),
            None => Ok(None),
        }
    }

    async fn merge(
        &self,
        course_id: &str,
        fields: Map<String, Value>,
        condition: WriteCondition,
    ) -> Result<(), MetaError> {
        self.enter().await?;
        let mut docs = self.docs.write().await;
        let current = docs.get(course_id).map(|(_, rev)| rev.to_string());

        match (&condition, &current) {
            (WriteCondition::Absent, Some(_)) => {
                return Err(MetaError::Conflict(format!("{} already exists", course_id)));
            }
            (WriteCondition::UpdatedAt(expected), Some(actual)) if expected != actual => {
                return Err(MetaError::Conflict(format!(
                    "{} changed: expected {}, found {}",
                    course_id, expected, actual
                )));
            }
            (WriteCondition::UpdatedAt(_), None) => {
                return Err(MetaError::Conflict(format!("{} no longer exists", course_id)));
            }
            _ => {}
        }

        let rev = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = docs
            .entry(course_id.to_string())
            .or_insert_with(|| (Map::new(), rev));
        entry.0.extend(fields);
        entry.1 = rev;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredDocument>, MetaError> {
        self.enter().await?;
        let docs = self.docs.read().await;
        let mut listed = Vec::with_capacity(docs.len());
        for (id, (fields, rev)) in docs.iter() {
            listed.push(Self::stored(id, fields, *rev)?);
        }
        listed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listed)
    }

    async fn delete(&self, course_id: &str) -> Result<(), MetaError> {
        self.enter().await?;
        self.docs.write().await.remove(course_id);
        self.lessons.write().await.remove(course_id);
        Ok(())
    }

    async fn legacy_lessons(&self, course_id: &str) -> Result<Vec<Lesson>, MetaError> {
        self.enter().await?;
        Ok(self
            .lessons
            .read()
            .await
            .get(course_id)
            .cloned()
            .unwrap_or_default())
    }
}
