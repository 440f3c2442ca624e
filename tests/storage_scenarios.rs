use std::sync::Arc;
use std::time::Duration;

use course_store::blob::{BlobStoreClient, InMemoryBlobTransport};
use course_store::cache::PointerCache;
use course_store::config::StorageConfig;
use course_store::db::LocalRegistry;
use course_store::drive::{DriveFallback, FolderIdCache, InMemoryDrive};
use course_store::metadata::{Fault, InMemoryMetadataStore, MetadataStore};
use course_store::models::{BlockKind, ContentBlock, Course, Lesson, SummarySource};
use course_store::services::{CourseStorage, RegistryReconciler};
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;

const SLOW: Duration = Duration::from_millis(300);

struct Harness {
    storage: Arc<CourseStorage>,
    metadata: Arc<InMemoryMetadataStore>,
    blobs: Arc<InMemoryBlobTransport>,
    drive: Arc<InMemoryDrive>,
    registry: LocalRegistry,
    cache: Arc<PointerCache>,
}

async fn setup(config: StorageConfig) -> Harness {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create registry db");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let registry = LocalRegistry::new(pool);
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let blobs = Arc::new(InMemoryBlobTransport::new());
    let drive = Arc::new(InMemoryDrive::new());
    let cache = Arc::new(PointerCache::new(config.pointer_cache_ttl));

    let storage = CourseStorage::new(config.clone(), metadata.clone(), registry.clone(), cache.clone())
        .with_blob_store(BlobStoreClient::new(blobs.clone(), config.blob_max_bytes))
        .with_drive(Arc::new(DriveFallback::new(
            drive.clone(),
            "course-store/courses",
            Arc::new(FolderIdCache::new()),
        )));

    Harness {
        storage: Arc::new(storage),
        metadata,
        blobs,
        drive,
        registry,
        cache,
    }
}

fn test_config() -> StorageConfig {
    StorageConfig {
        metadata_timeout: Duration::from_millis(100),
        ..Default::default()
    }
}

fn course(title: &str) -> Course {
    Course {
        id: "c1".to_string(),
        title: title.to_string(),
        instructor: "Kim".to_string(),
        lessons: vec![Lesson {
            id: "l1".to_string(),
            title: "Welcome".to_string(),
            duration: Some("5m".to_string()),
            blocks: vec![
                ContentBlock {
                    kind: BlockKind::Heading,
                    value: title.to_string(),
                    ..Default::default()
                },
                ContentBlock {
                    kind: BlockKind::Code,
                    value: "fn main() {}".to_string(),
                    language: Some("rust".to_string()),
                    ..Default::default()
                },
            ],
        }],
        ..Default::default()
    }
}

async fn draft_blob_id(h: &Harness, id: &str) -> String {
    h.metadata
        .get(id)
        .await
        .expect("Failed to read metadata")
        .and_then(|s| s.doc.draft_snapshot)
        .map(|p| p.blob_id)
        .expect("Draft pointer missing")
}

#[tokio::test]
async fn test_slow_metadata_save_is_served_from_registry() {
    let h = setup(test_config()).await;

    assert!(h.storage.save_course("c1", &course("Intro v1")).await);
    let saved = h.storage.get_course("c1").await.expect("Course missing");
    assert_eq!(saved.title, "Intro v1");
    assert_eq!(saved.lessons[0].blocks[1].language.as_deref(), Some("rust"));
    assert!(saved.is_draft);
    assert!(h.storage.get_published_course("c1").await.is_none());

    h.metadata.set_latency(SLOW);
    assert!(h.storage.save_course("c1", &course("Intro v2")).await);

    let entry = h.registry.get("c1").await.unwrap().expect("Registry entry missing");
    assert!(entry.pending_sync);
    assert_eq!(entry.meta.title, "Intro v2");

    let current = h.storage.get_course("c1").await.expect("Course missing");
    assert_eq!(current.title, "Intro v2");
    assert_eq!(current.lessons[0].blocks[0].value, "Intro v2");
    assert!(h.storage.get_published_course("c1").await.is_none());
}

#[tokio::test]
async fn test_every_save_writes_a_new_blob() {
    let h = setup(test_config()).await;

    assert!(h.storage.save_course("c1", &course("First")).await);
    let first_id = draft_blob_id(&h, "c1").await;
    let first_bytes = h.blobs.object(&first_id).await.expect("First blob missing");

    assert!(h.storage.save_course("c1", &course("Second")).await);
    let second_id = draft_blob_id(&h, "c1").await;

    assert_ne!(first_id, second_id);
    assert_eq!(h.blobs.upload_count(), 2);
    assert_eq!(h.blobs.object(&first_id).await.unwrap(), first_bytes);

    let doc = h.metadata.get("c1").await.unwrap().unwrap().doc;
    assert_eq!(doc.draft_snapshot.unwrap().version, 2);
}

#[tokio::test]
async fn test_registry_wins_while_metadata_is_down() {
    let h = setup(test_config()).await;
    assert!(h.storage.save_course("c1", &course("Old")).await);

    h.metadata.set_fault(Some(Fault::Transport));
    assert!(h.storage.save_course("c1", &course("New")).await);

    let current = h.storage.get_course("c1").await.expect("Course missing");
    assert_eq!(current.title, "New");
    assert!(current.dirty);

    let listed = h.storage.list_courses().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].source, SummarySource::Registry);
    assert!(listed[0].pending_sync);
}

#[tokio::test]
async fn test_students_only_see_published_content() {
    let h = setup(test_config()).await;

    assert!(h.storage.save_course("c1", &course("Launch")).await);
    assert!(h.storage.publish_course("c1", Some("editor-1")).await);
    assert!(h.storage.save_course("c1", &course("Launch (edited)")).await);

    let student = h.storage.get_published_course("c1").await.expect("Published missing");
    assert_eq!(student.title, "Launch");
    assert_eq!(student.lessons[0].blocks[0].value, "Launch");
    assert!(student.published);
    assert!(!student.is_draft);

    let editor = h.storage.get_course("c1").await.expect("Draft missing");
    assert_eq!(editor.title, "Launch (edited)");
    assert!(editor.dirty);

    let summary = &h.storage.list_courses().await[0];
    assert!(summary.is_published);
    assert!(summary.has_draft);
}

#[tokio::test]
async fn test_legacy_published_course_keeps_live_title_after_draft() {
    let h = setup(test_config()).await;
    h.metadata
        .insert_raw("c1", json!({"title": "Old Published", "is_published": true}))
        .await;
    h.metadata
        .insert_legacy_lessons(
            "c1",
            vec![Lesson {
                id: "l1".to_string(),
                title: "Live lesson".to_string(),
                ..Default::default()
            }],
        )
        .await;

    assert!(h.storage.save_course("c1", &course("Secret Draft")).await);

    let student = h.storage.get_published_course("c1").await.expect("Published missing");
    assert_eq!(student.title, "Old Published");
    assert_eq!(student.lessons[0].title, "Live lesson");

    let editor = h.storage.get_course("c1").await.expect("Draft missing");
    assert_eq!(editor.title, "Secret Draft");
    assert!(editor.is_draft);
}

#[tokio::test]
async fn test_late_pointer_write_does_not_replace_newer_save() {
    let h = setup(test_config()).await;
    assert!(h.storage.save_course("c1", &course("v0")).await);

    h.metadata.set_latency(SLOW);
    assert!(h.storage.save_course("c1", &course("A older")).await);
    h.metadata.set_latency(Duration::ZERO);
    assert!(h.storage.save_course("c1", &course("B newer")).await);
    assert!(h.registry.get("c1").await.unwrap().is_none());

    // let the older detached pointer write finish
    tokio::time::sleep(SLOW * 3).await;

    assert_eq!(h.storage.get_course("c1").await.unwrap().title, "B newer");
    let doc = h.metadata.get("c1").await.unwrap().unwrap().doc;
    assert_eq!(doc.meta.title, "B newer");
    assert_eq!(doc.draft_snapshot.unwrap().meta.title, "B newer");
}

#[tokio::test]
async fn test_editor_read_survives_metadata_outage_via_cache() {
    let h = setup(test_config()).await;
    assert!(h.storage.save_course("c1", &course("Working copy")).await);

    h.metadata.set_fault(Some(Fault::Transport));
    let editor = h.storage.get_course("c1").await.expect("Cache miss");
    assert_eq!(editor.title, "Working copy");
    assert!(editor.is_draft);
    assert!(!editor.published);
}

#[tokio::test]
async fn test_blob_failure_falls_back_to_legacy_document() {
    let h = setup(test_config()).await;
    h.blobs.set_fail_uploads(true);

    assert!(h.storage.save_course("c1", &course("Inline")).await);
    let doc = h.metadata.get("c1").await.unwrap().unwrap().doc;
    assert_eq!(doc.lessons.len(), 1);
    assert!(doc.draft_snapshot.is_none());

    let current = h.storage.get_course("c1").await.expect("Course missing");
    assert_eq!(current.title, "Inline");
    assert_eq!(current.lessons[0].title, "Welcome");
}

#[tokio::test]
async fn test_save_fails_when_every_tier_fails() {
    let h = setup(test_config()).await;
    h.blobs.set_fail_uploads(true);
    h.metadata.set_fault(Some(Fault::Quota));

    assert!(!h.storage.save_course("c1", &course("Nowhere")).await);
    assert!(h.registry.get("c1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_drive_tier_used_when_blob_store_disabled() {
    let h = setup(StorageConfig {
        blob_store_enabled: false,
        drive_enabled: true,
        ..test_config()
    })
    .await;

    assert!(h.storage.save_course("c1", &course("On drive")).await);
    assert!(h.storage.save_course("c1", &course("On drive v2")).await);
    assert_eq!(h.drive.files_named("c1.json").await, 1);
    assert_eq!(h.blobs.upload_count(), 0);

    let current = h.storage.get_course("c1").await.expect("Course missing");
    assert_eq!(current.title, "On drive v2");
    // never published
    assert!(h.storage.get_published_course("c1").await.is_none());

    let listed = h.storage.list_courses().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].source, SummarySource::Drive);

    assert!(h.storage.delete_course("c1").await);
    assert_eq!(h.drive.files_named("c1.json").await, 0);
}

#[tokio::test]
async fn test_published_read_survives_metadata_outage_via_cache() {
    let h = setup(test_config()).await;
    assert!(h.storage.save_course("c1", &course("Cached")).await);
    assert!(h.storage.publish_course("c1", None).await);
    h.cache.clear().await;

    let first = h.storage.get_published_course("c1").await.expect("Published missing");
    assert_eq!(first.title, "Cached");

    h.metadata.set_fault(Some(Fault::Transport));
    let calls = h.metadata.call_count();
    let second = h.storage.get_published_course("c1").await.expect("Cache miss");
    assert_eq!(second.title, first.title);
    assert_eq!(second.lessons, first.lessons);
    assert_eq!(h.metadata.call_count(), calls);
}

#[tokio::test]
async fn test_pre_migration_courses_are_readable() {
    let h = setup(test_config()).await;
    h.metadata
        .insert_raw(
            "old",
            json!({
                "title": "Legacy course",
                "is_published": true,
                "lessons": [{"id": "l1", "title": "Inline", "blocks": [{"type": "paragraph", "value": "text"}]}]
            }),
        )
        .await;
    h.metadata
        .insert_raw("older", json!({"title": "Subcollection course", "is_published": false}))
        .await;
    h.metadata
        .insert_legacy_lessons(
            "older",
            vec![Lesson {
                id: "l1".to_string(),
                title: "From subcollection".to_string(),
                ..Default::default()
            }],
        )
        .await;

    let old = h.storage.get_published_course("old").await.expect("Legacy course missing");
    assert_eq!(old.title, "Legacy course");
    assert_eq!(old.lessons[0].blocks[0].value, "text");

    let older = h.storage.get_course("older").await.expect("Subcollection course missing");
    assert_eq!(older.lessons[0].title, "From subcollection");
    assert!(h.storage.get_published_course("older").await.is_none());
}

#[tokio::test]
async fn test_delete_tolerates_quota_but_not_other_errors() {
    let h = setup(test_config()).await;
    assert!(h.storage.save_course("c1", &course("Doomed")).await);
    h.metadata.set_fault(Some(Fault::Transport));
    assert!(h.storage.save_course("c1", &course("Doomed v2")).await);

    h.metadata.set_fault(Some(Fault::Quota));
    assert!(h.storage.delete_course("c1").await);
    assert!(h.registry.get("c1").await.unwrap().is_none());
    assert!(h.cache.get_any("c1").await.is_none());

    h.metadata.set_fault(Some(Fault::Transport));
    assert!(!h.storage.delete_course("c1").await);

    h.metadata.set_fault(None);
    assert!(h.storage.delete_course("c1").await);
    assert!(h.storage.get_course("c1").await.is_none());
}

#[tokio::test]
async fn test_publish_during_metadata_timeout_is_kept_locally() {
    let h = setup(test_config()).await;
    assert!(h.storage.save_course("c1", &course("Ready")).await);

    h.metadata.set_latency(SLOW);
    assert!(h.storage.publish_course("c1", Some("editor-1")).await);

    let entry = h.registry.get("c1").await.unwrap().expect("Registry entry missing");
    assert!(!entry.pending_sync);

    let student = h.storage.get_published_course("c1").await.expect("Published missing");
    assert_eq!(student.title, "Ready");
}

#[tokio::test]
async fn test_reconcile_replays_pending_entries() {
    let h = setup(test_config()).await;
    h.metadata.set_fault(Some(Fault::Transport));
    assert!(h.storage.save_course("c1", &course("Offline edit")).await);
    let blob_id = h.registry.get("c1").await.unwrap().unwrap().blob_id;

    h.metadata.set_fault(None);
    let reconciler = RegistryReconciler::new(h.storage.clone());
    let stats = reconciler.reconcile_all().await.expect("Failed to reconcile");

    assert_eq!(stats.drafts_confirmed, 1);
    assert_eq!(stats.failed, 0);
    assert!(h.registry.get("c1").await.unwrap().is_none());
    assert_eq!(draft_blob_id(&h, "c1").await, blob_id);
    assert_eq!(h.storage.get_course("c1").await.unwrap().title, "Offline edit");
}

#[tokio::test]
async fn test_reconcile_drops_entries_whose_write_landed_late() {
    let h = setup(test_config()).await;
    h.metadata.set_latency(SLOW);
    assert!(h.storage.save_course("c1", &course("Late")).await);
    assert!(h.registry.get("c1").await.unwrap().is_some());

    // let the detached pointer write finish
    tokio::time::sleep(SLOW * 3).await;
    h.metadata.set_latency(Duration::ZERO);

    let stats = RegistryReconciler::new(h.storage.clone())
        .reconcile_all()
        .await
        .expect("Failed to reconcile");
    assert_eq!(stats.already_landed, 1);
    assert!(h.registry.get("c1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_next_save_confirms_locally_kept_publish() {
    let h = setup(test_config()).await;
    assert!(h.storage.save_course("c1", &course("Ready")).await);

    h.metadata.set_fault(Some(Fault::Transport));
    assert!(h.storage.publish_course("c1", None).await);
    assert!(!h.registry.get("c1").await.unwrap().unwrap().pending_sync);

    h.metadata.set_fault(None);
    assert!(h.storage.save_course("c1", &course("Ready v2")).await);

    assert!(h.registry.get("c1").await.unwrap().is_none());
    let doc = h.metadata.get("c1").await.unwrap().unwrap().doc;
    assert!(doc.is_published);
    assert!(doc.dirty);

    assert_eq!(h.storage.get_published_course("c1").await.unwrap().title, "Ready");
    assert_eq!(h.storage.get_course("c1").await.unwrap().title, "Ready v2");
}

#[tokio::test]
async fn test_draft_saved_during_outage_keeps_local_publish() {
    let h = setup(test_config()).await;
    assert!(h.storage.save_course("c1", &course("Pub A")).await);

    h.metadata.set_fault(Some(Fault::Quota));
    assert!(h.storage.publish_course("c1", Some("editor-1")).await);
    assert_eq!(h.storage.get_published_course("c1").await.unwrap().title, "Pub A");

    assert!(h.storage.save_course("c1", &course("Draft B")).await);

    let student = h.storage.get_published_course("c1").await.expect("Local publish lost");
    assert_eq!(student.title, "Pub A");
    assert_eq!(student.lessons[0].blocks[0].value, "Pub A");
    assert_eq!(h.storage.get_course("c1").await.unwrap().title, "Draft B");

    let listed = h.storage.list_courses().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].meta.title, "Draft B");
    assert!(listed[0].is_published);
    assert!(listed[0].pending_sync);

    h.metadata.set_fault(None);
    let stats = RegistryReconciler::new(h.storage.clone())
        .reconcile_all()
        .await
        .expect("Failed to reconcile");
    assert_eq!(stats.drafts_confirmed, 1);
    assert_eq!(stats.publishes_confirmed, 1);
    assert!(h.registry.get("c1").await.unwrap().is_none());

    let doc = h.metadata.get("c1").await.unwrap().unwrap().doc;
    assert_eq!(doc.published.unwrap().meta.title, "Pub A");
    assert_eq!(doc.draft_snapshot.unwrap().meta.title, "Draft B");
    assert!(doc.dirty);
}

#[tokio::test]
async fn test_intro_course_round_trip_then_timeout() {
    let h = setup(test_config()).await;
    let intro: Course = serde_json::from_value(json!({
        "id": "c1",
        "title": "Intro",
        "lessons": [{"id": "l1", "title": "", "blocks": [{"id": "b1", "type": "paragraph", "value": "Hello"}]}]
    }))
    .expect("Failed to build course");

    assert!(h.storage.save_course("c1", &intro).await);
    let loaded = h.storage.get_course("c1").await.expect("Course missing");
    assert_eq!(loaded.title, "Intro");
    assert_eq!(loaded.lessons[0].id, "l1");
    assert_eq!(loaded.lessons[0].blocks[0].id.as_deref(), Some("b1"));
    assert_eq!(loaded.lessons[0].blocks[0].value, "Hello");
    assert!(h.storage.get_published_course("c1").await.is_none());

    h.metadata.set_latency(SLOW);
    let mut renamed = intro.clone();
    renamed.title = "Intro v2".to_string();
    assert!(h.storage.save_course("c1", &renamed).await);

    let loaded = h.storage.get_course("c1").await.expect("Course missing");
    assert_eq!(loaded.title, "Intro v2");
    assert!(loaded.is_draft);
    assert!(h.registry.get("c1").await.unwrap().is_some());
}
