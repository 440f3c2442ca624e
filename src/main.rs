use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use course_store::api::router;
use course_store::blob::{BlobStoreClient, BlobTransport, InMemoryBlobTransport, TelegramConfig, TelegramTransport};
use course_store::cache::PointerCache;
use course_store::config::{ServerConfig, StorageConfig};
use course_store::db::LocalRegistry;
use course_store::drive::{DriveApi, DriveConfig, DriveFallback, FolderIdCache, GoogleDriveClient, InMemoryDrive};
use course_store::metadata::{FirestoreClient, FirestoreConfig, InMemoryMetadataStore, MetadataStore};
use course_store::services::{CourseStorage, ReconcileScheduler};
use course_store::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "course_store=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = ServerConfig::new_from_env()?;
    let config = StorageConfig::new_from_env()?;

    let registry = LocalRegistry::connect(&server.registry_database_url).await?;
    match registry.pending_count().await {
        Ok(0) => {}
        Ok(n) => warn!("{} course saves are waiting in the local registry", n),
        Err(e) => warn!("Could not count registry entries: {}", e),
    }

    let transport: Arc<dyn BlobTransport> = match TelegramConfig::new_from_env() {
        Ok(cfg) => Arc::new(TelegramTransport::new(cfg)?),
        Err(e) => {
            warn!("Blob store not configured ({}), using in-memory blobs", e);
            Arc::new(InMemoryBlobTransport::new())
        }
    };

    let metadata: Arc<dyn MetadataStore> = match FirestoreConfig::new_from_env() {
        Ok(cfg) => Arc::new(FirestoreClient::new(cfg)?),
        Err(e) => {
            warn!("Metadata store not configured ({}), using in-memory documents", e);
            Arc::new(InMemoryMetadataStore::new())
        }
    };

    let (drive_api, drive_root): (Arc<dyn DriveApi>, String) = match DriveConfig::new_from_env() {
        Ok(cfg) => {
            let root = cfg.root_folder.clone();
            (Arc::new(GoogleDriveClient::new(cfg)?), root)
        }
        Err(e) => {
            if config.drive_enabled {
                warn!("Drive not configured ({}), using in-memory drive", e);
            }
            (Arc::new(InMemoryDrive::new()), "course-store/courses".to_string())
        }
    };
    let drive = DriveFallback::new(drive_api, drive_root, Arc::new(FolderIdCache::new()));

    let blobs = BlobStoreClient::new(transport, config.blob_max_bytes);
    let cache = Arc::new(PointerCache::new(config.pointer_cache_ttl));
    let storage = CourseStorage::new(config, metadata, registry, cache)
        .with_blob_store(blobs)
        .with_drive(Arc::new(drive));

    let state = AppState::new(Arc::new(storage));

    if let Some(interval) = server.reconcile_interval {
        let scheduler = ReconcileScheduler::new(state.reconciler.clone(), interval);
        tokio::spawn(scheduler.start());
    } else {
        info!("Registry reconciliation disabled");
    }

    let app = router(state);

    info!("listening on http://{}", server.bind_addr);
    let listener = tokio::net::TcpListener::bind(server.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
