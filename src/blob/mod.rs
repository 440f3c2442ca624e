pub mod dto;
pub mod telegram;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::codec::sha256_hex;
use crate::error::BlobError;

pub use telegram::{TelegramConfig, TelegramTransport};

/// Raw object transport behind the blob store. Identifiers are opaque and
/// assigned by the transport on every upload.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, BlobError>;
    async fn download(&self, file_id: &str) -> Result<Option<Vec<u8>>, BlobError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub file_id: String,
    pub hash: String,
}

/// Content storage with no notion of courses or versions. No retries here;
/// the caller decides what a failure means.
#[derive(Clone)]
pub struct BlobStoreClient {
    transport: Arc<dyn BlobTransport>,
    max_bytes: usize,
}

impl BlobStoreClient {
    pub fn new(transport: Arc<dyn BlobTransport>, max_bytes: usize) -> Self {
        Self { transport, max_bytes }
    }

    pub async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<UploadReceipt, BlobError> {
        if bytes.len() > self.max_bytes {
            return Err(BlobError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }
        let hash = sha256_hex(&bytes);
        let file_id = self.transport.upload(key, bytes).await?;
        tracing::debug!("uploaded blob {} as {} ({})", key, file_id, hash);
        Ok(UploadReceipt { file_id, hash })
    }

    pub async fn download(&self, file_id: &str) -> Result<Option<Vec<u8>>, BlobError> {
        self.transport.download(file_id).await
    }
}

/// Process-local transport used in development and tests.
#[derive(Default)]
pub struct InMemoryBlobTransport {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
    uploads: AtomicUsize,
}

impl InMemoryBlobTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub async fn object(&self, file_id: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(file_id).cloned()
    }
}

#[async_trait]
impl BlobTransport for InMemoryBlobTransport {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, BlobError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(BlobError::Transport(format!("upload of {} refused", key)));
        }
        let file_id = format!("mem-{}", Uuid::new_v4());
        self.objects.write().await.insert(file_id.clone(), bytes);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(file_id)
    }

    async fn download(&self, file_id: &str) -> Result<Option<Vec<u8>>, BlobError> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(BlobError::Transport(format!("download of {} refused", file_id)));
        }
        Ok(self.objects.read().await.get(file_id).cloned())
    }
}
