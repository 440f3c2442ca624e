//! Write-ahead registry of blob uploads whose pointer write did not land.
//!
//! Backed by a SQLite file local to this instance; it survives restarts but is
//! not shared between instances.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use crate::models::{CourseMeta, LocalRegistryEntry, SectionCompact};

#[derive(Debug, FromRow)]
struct RegistryRow {
    course_id: String,
    blob_id: String,
    meta: String,
    sections: String,
    created_at: String,
    pending_sync: bool,
}

impl TryFrom<RegistryRow> for LocalRegistryEntry {
    type Error = sqlx::Error;

    fn try_from(row: RegistryRow) -> Result<Self, Self::Error> {
        let meta: CourseMeta =
            serde_json::from_str(&row.meta).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let sections: Vec<SectionCompact> =
            serde_json::from_str(&row.sections).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
            .with_timezone(&Utc);

        Ok(LocalRegistryEntry {
            course_id: row.course_id,
            blob_id: row.blob_id,
            meta,
            sections,
            created_at,
            pending_sync: row.pending_sync,
        })
    }
}

#[derive(Clone)]
pub struct LocalRegistry {
    db: SqlitePool,
}

impl LocalRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Opens (creating if needed) the registry database and applies migrations.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Records (or replaces) the draft entry (`pending_sync`) or the locally
    /// kept publish of a course. The two kinds never overwrite each other.
    pub async fn add(
        &self,
        course_id: &str,
        blob_id: &str,
        meta: &CourseMeta,
        sections: &[SectionCompact],
        pending_sync: bool,
    ) -> Result<LocalRegistryEntry, sqlx::Error> {
        let now = Utc::now();
        let meta_json = serde_json::to_string(meta).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let sections_json =
            serde_json::to_string(sections).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            r#"
            INSERT INTO local_registry
                (course_id, blob_id, meta, sections, created_at, pending_sync)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(course_id, pending_sync) DO UPDATE SET
                blob_id = excluded.blob_id,
                meta = excluded.meta,
                sections = excluded.sections,
                created_at = excluded.created_at
            "#,
        )
        .bind(course_id)
        .bind(blob_id)
        .bind(&meta_json)
        .bind(&sections_json)
        .bind(now.to_rfc3339())
        .bind(pending_sync)
        .execute(&self.db)
        .await?;

        Ok(LocalRegistryEntry {
            course_id: course_id.to_string(),
            blob_id: blob_id.to_string(),
            meta: meta.clone(),
            sections: sections.to_vec(),
            created_at: now,
            pending_sync,
        })
    }

    /// Newest content for a course: the pending draft if any, else the local publish.
    pub async fn get(&self, course_id: &str) -> Result<Option<LocalRegistryEntry>, sqlx::Error> {
        sqlx::query_as::<_, RegistryRow>(
            "SELECT course_id, blob_id, meta, sections, created_at, pending_sync FROM local_registry WHERE course_id = ? ORDER BY pending_sync DESC LIMIT 1"
        )
        .bind(course_id)
        .fetch_optional(&self.db)
        .await?
        .map(LocalRegistryEntry::try_from)
        .transpose()
    }

    /// The publish kept locally, never a draft.
    pub async fn get_published(&self, course_id: &str) -> Result<Option<LocalRegistryEntry>, sqlx::Error> {
        self.get_kind(course_id, false).await
    }

    pub async fn get_pending(&self, course_id: &str) -> Result<Option<LocalRegistryEntry>, sqlx::Error> {
        self.get_kind(course_id, true).await
    }

    async fn get_kind(&self, course_id: &str, pending_sync: bool) -> Result<Option<LocalRegistryEntry>, sqlx::Error> {
        sqlx::query_as::<_, RegistryRow>(
            "SELECT course_id, blob_id, meta, sections, created_at, pending_sync FROM local_registry WHERE course_id = ? AND pending_sync = ?"
        )
        .bind(course_id)
        .bind(pending_sync)
        .fetch_optional(&self.db)
        .await?
        .map(LocalRegistryEntry::try_from)
        .transpose()
    }

    /// All entries, newest first. Rows that fail to decode are skipped.
    pub async fn get_all(&self) -> Result<Vec<LocalRegistryEntry>, sqlx::Error> {
        let rows = sqlx::query_as::<_, RegistryRow>(
            "SELECT course_id, blob_id, meta, sections, created_at, pending_sync FROM local_registry ORDER BY created_at DESC"
        )
        .fetch_all(&self.db)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let course_id = row.course_id.clone();
            match LocalRegistryEntry::try_from(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("skipping unreadable registry entry {}: {}", course_id, e),
            }
        }
        Ok(entries)
    }

    pub async fn remove(&self, course_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM local_registry WHERE course_id = ?")
            .bind(course_id)
            .execute(&self.db)
            .await?
            .rows_affected();
        Ok(result > 0)
    }

    /// Removes one kind of entry only if it still names `blob_id`, so a newer
    /// entry written meanwhile survives.
    pub async fn remove_if_blob(
        &self,
        course_id: &str,
        pending_sync: bool,
        blob_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM local_registry WHERE course_id = ? AND pending_sync = ? AND blob_id = ?",
        )
        .bind(course_id)
        .bind(pending_sync)
        .bind(blob_id)
        .execute(&self.db)
        .await?
        .rows_affected();
        Ok(result > 0)
    }

    pub async fn pending_count(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM local_registry WHERE pending_sync = 1")
                .fetch_one(&self.db)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_registry() -> LocalRegistry {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test db");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        LocalRegistry::new(pool)
    }

    fn meta(title: &str) -> CourseMeta {
        CourseMeta {
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn sections() -> Vec<SectionCompact> {
        vec![SectionCompact {
            id: "s1".to_string(),
            title: "第1部".to_string(),
            lesson_ids: vec!["l1".to_string()],
        }]
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let registry = setup_test_registry().await;

        registry
            .add("c1", "blob-1", &meta("数学I"), &sections(), true)
            .await
            .expect("Failed to add entry");

        let entry = registry.get("c1").await.unwrap().expect("Entry not found");
        assert_eq!(entry.blob_id, "blob-1");
        assert_eq!(entry.meta.title, "数学I");
        assert_eq!(entry.sections, sections());
        assert!(entry.pending_sync);
        assert_eq!(registry.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_replaces_entry_of_same_kind() {
        let registry = setup_test_registry().await;

        registry.add("c1", "blob-1", &meta("v1"), &[], true).await.unwrap();
        registry.add("c1", "blob-2", &meta("v2"), &[], true).await.unwrap();

        let all = registry.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].blob_id, "blob-2");
        assert_eq!(registry.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_draft_entry_does_not_replace_local_publish() {
        let registry = setup_test_registry().await;

        registry.add("c1", "pub-1", &meta("Published"), &[], false).await.unwrap();
        registry.add("c1", "draft-2", &meta("Draft"), &[], true).await.unwrap();

        assert_eq!(registry.get_all().await.unwrap().len(), 2);
        assert_eq!(registry.get("c1").await.unwrap().unwrap().blob_id, "draft-2");
        let published = registry.get_published("c1").await.unwrap().expect("Publish lost");
        assert_eq!(published.blob_id, "pub-1");

        assert!(registry.remove_if_blob("c1", true, "draft-2").await.unwrap());
        assert!(registry.get_pending("c1").await.unwrap().is_none());
        assert_eq!(registry.get("c1").await.unwrap().unwrap().blob_id, "pub-1");
    }

    #[tokio::test]
    async fn test_remove_if_blob_keeps_newer_entry() {
        let registry = setup_test_registry().await;

        registry.add("c1", "blob-2", &meta("v2"), &[], true).await.unwrap();
        assert!(!registry.remove_if_blob("c1", true, "blob-1").await.unwrap());
        assert!(!registry.remove_if_blob("c1", false, "blob-2").await.unwrap());
        assert!(registry.get("c1").await.unwrap().is_some());

        assert!(registry.remove_if_blob("c1", true, "blob-2").await.unwrap());
        assert!(registry.get("c1").await.unwrap().is_none());
        assert!(!registry.remove("c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let url = format!("sqlite://{}", dir.path().join("registry.db").display());

        {
            let registry = LocalRegistry::connect(&url).await.expect("Failed to open registry");
            registry.add("c1", "blob-1", &meta("Intro"), &[], true).await.unwrap();
            registry.pool().close().await;
        }

        let reopened = LocalRegistry::connect(&url).await.expect("Failed to reopen registry");
        let entry = reopened.get("c1").await.unwrap().expect("Entry lost on reopen");
        assert_eq!(entry.meta.title, "Intro");
    }
}
