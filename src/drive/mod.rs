//! Cold fallback that keeps whole course documents as `{course_id}.json`
//! files in a fixed drive folder.

pub mod dto;
pub mod google;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DriveError;
use crate::models::Course;

pub use google::{DriveConfig, GoogleDriveClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn find_folder(&self, name: &str, parent: Option<&str>) -> Result<Option<String>, DriveError>;
    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String, DriveError>;
    async fn find_file(&self, name: &str, folder_id: &str) -> Result<Option<String>, DriveError>;
    async fn create_file(&self, name: &str, folder_id: &str, bytes: Vec<u8>) -> Result<String, DriveError>;
    async fn update_file(&self, file_id: &str, bytes: Vec<u8>) -> Result<(), DriveError>;
    async fn download(&self, file_id: &str) -> Result<Option<Vec<u8>>, DriveError>;
    async fn list_files(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError>;
    async fn delete_file(&self, file_id: &str) -> Result<(), DriveError>;
}

/// Resolved folder IDs keyed by `/`-separated path. One instance per process,
/// shared by every `DriveFallback` built from it.
#[derive(Default)]
pub struct FolderIdCache {
    ids: RwLock<HashMap<String, String>>,
}

impl FolderIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, path: &str) -> Option<String> {
        self.ids.read().await.get(path).cloned()
    }

    pub async fn insert(&self, path: &str, id: String) {
        self.ids.write().await.insert(path.to_string(), id);
    }

    pub async fn clear(&self) {
        self.ids.write().await.clear();
    }
}

pub struct DriveFallback {
    api: Arc<dyn DriveApi>,
    root_path: String,
    folders: Arc<FolderIdCache>,
    // Serializes find-then-create so one course never gets two files.
    save_lock: Mutex<()>,
}

impl DriveFallback {
    pub fn new(api: Arc<dyn DriveApi>, root_path: impl Into<String>, folders: Arc<FolderIdCache>) -> Self {
        Self {
            api,
            root_path: root_path.into(),
            folders,
            save_lock: Mutex::new(()),
        }
    }

    pub async fn save(&self, course_id: &str, course: &Course) -> bool {
        let _guard = self.save_lock.lock().await;
        match self.try_save(course_id, course).await {
            Ok(()) => true,
            Err(e) => {
                warn!("drive save failed for course {}: {}", course_id, e);
                self.forget_folder_on_missing(&e).await;
                false
            }
        }
    }

    pub async fn get(&self, course_id: &str) -> Option<Course> {
        match self.try_get(course_id).await {
            Ok(course) => course,
            Err(e) => {
                warn!("drive read failed for course {}: {}", course_id, e);
                self.forget_folder_on_missing(&e).await;
                None
            }
        }
    }

    pub async fn list(&self) -> Vec<Course> {
        let folder_id = match self.folder_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!("drive folder lookup failed: {}", e);
                return Vec::new();
            }
        };

        let files = match self.api.list_files(&folder_id).await {
            Ok(files) => files,
            Err(e) => {
                warn!("drive listing failed: {}", e);
                self.forget_folder_on_missing(&e).await;
                return Vec::new();
            }
        };

        let mut courses = Vec::new();
        for file in files.into_iter().filter(|f| f.name.ends_with(".json")) {
            match self.api.download(&file.id).await {
                Ok(Some(bytes)) => match serde_json::from_slice::<Course>(&bytes) {
                    Ok(course) => courses.push(course),
                    Err(e) => warn!("skipping unreadable drive file {}: {}", file.name, e),
                },
                Ok(None) => debug!("drive file {} vanished during listing", file.name),
                Err(e) => warn!("failed to download drive file {}: {}", file.name, e),
            }
        }
        courses
    }

    /// True when no file for the course remains.
    pub async fn delete(&self, course_id: &str) -> bool {
        let _guard = self.save_lock.lock().await;
        let result = async {
            let folder_id = self.folder_id().await?;
            if let Some(file_id) = self.api.find_file(&file_name(course_id), &folder_id).await? {
                self.api.delete_file(&file_id).await?;
                info!("deleted drive copy of course {}", course_id);
            }
            Ok::<(), DriveError>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("drive delete failed for course {}: {}", course_id, e);
                false
            }
        }
    }

    async fn try_save(&self, course_id: &str, course: &Course) -> Result<(), DriveError> {
        let folder_id = self.folder_id().await?;
        let name = file_name(course_id);
        let bytes = serde_json::to_vec(course)?;

        match self.api.find_file(&name, &folder_id).await? {
            Some(file_id) => {
                self.api.update_file(&file_id, bytes).await?;
                debug!("updated drive file {} for course {}", file_id, course_id);
            }
            None => {
                let file_id = self.api.create_file(&name, &folder_id, bytes).await?;
                info!("created drive file {} for course {}", file_id, course_id);
            }
        }
        Ok(())
    }

    async fn try_get(&self, course_id: &str) -> Result<Option<Course>, DriveError> {
        let folder_id = self.folder_id().await?;
        let Some(file_id) = self.api.find_file(&file_name(course_id), &folder_id).await? else {
            return Ok(None);
        };
        let Some(bytes) = self.api.download(&file_id).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn folder_id(&self) -> Result<String, DriveError> {
        if let Some(id) = self.folders.get(&self.root_path).await {
            return Ok(id);
        }

        let mut parent: Option<String> = None;
        let mut walked = String::new();
        for segment in self.root_path.split('/').filter(|s| !s.is_empty()) {
            if !walked.is_empty() {
                walked.push('/');
            }
            walked.push_str(segment);

            let id = match self.folders.get(&walked).await {
                Some(id) => id,
                None => {
                    let id = match self.api.find_folder(segment, parent.as_deref()).await? {
                        Some(id) => id,
                        None => {
                            info!("creating drive folder {}", walked);
                            self.api.create_folder(segment, parent.as_deref()).await?
                        }
                    };
                    self.folders.insert(&walked, id.clone()).await;
                    id
                }
            };
            parent = Some(id);
        }

        parent.ok_or_else(|| DriveError::Transport("drive root path is empty".to_string()))
    }

    async fn forget_folder_on_missing(&self, err: &DriveError) {
        if let DriveError::Api { status: 404, .. } = err {
            self.folders.clear().await;
        }
    }
}

fn file_name(course_id: &str) -> String {
    format!("{}.json", course_id)
}

#[derive(Debug, Clone)]
struct MemEntry {
    name: String,
    parent: Option<String>,
    is_folder: bool,
    bytes: Vec<u8>,
}

/// Drive stand-in for development and tests.
#[derive(Default)]
pub struct InMemoryDrive {
    entries: RwLock<HashMap<String, MemEntry>>,
    folder_creates: AtomicUsize,
    folder_lookups: AtomicUsize,
}

impl InMemoryDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folder_creates(&self) -> usize {
        self.folder_creates.load(Ordering::SeqCst)
    }

    pub fn folder_lookups(&self) -> usize {
        self.folder_lookups.load(Ordering::SeqCst)
    }

    pub async fn files_named(&self, name: &str) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_folder && e.name == name)
            .count()
    }

    async fn find(&self, name: &str, parent: Option<&str>, folder: bool) -> Option<String> {
        self.entries
            .read()
            .await
            .iter()
            .find(|(_, e)| e.is_folder == folder && e.name == name && e.parent.as_deref() == parent)
            .map(|(id, _)| id.clone())
    }

    async fn insert(&self, name: &str, parent: Option<&str>, is_folder: bool, bytes: Vec<u8>) -> String {
        let id = Uuid::new_v4().to_string();
        self.entries.write().await.insert(
            id.clone(),
            MemEntry {
                name: name.to_string(),
                parent: parent.map(str::to_string),
                is_folder,
                bytes,
            },
        );
        id
    }
}

#[async_trait]
impl DriveApi for InMemoryDrive {
    async fn find_folder(&self, name: &str, parent: Option<&str>) -> Result<Option<String>, DriveError> {
        self.folder_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.find(name, parent, true).await)
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String, DriveError> {
        self.folder_creates.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(name, parent, true, Vec::new()).await)
    }

    async fn find_file(&self, name: &str, folder_id: &str) -> Result<Option<String>, DriveError> {
        Ok(self.find(name, Some(folder_id), false).await)
    }

    async fn create_file(&self, name: &str, folder_id: &str, bytes: Vec<u8>) -> Result<String, DriveError> {
        Ok(self.insert(name, Some(folder_id), false, bytes).await)
    }

    async fn update_file(&self, file_id: &str, bytes: Vec<u8>) -> Result<(), DriveError> {
        match self.entries.write().await.get_mut(file_id) {
            Some(entry) => {
                entry.bytes = bytes;
                Ok(())
            }
            None => Err(DriveError::Api {
                status: 404,
                body: format!("file {} not found", file_id),
            }),
        }
    }

    async fn download(&self, file_id: &str) -> Result<Option<Vec<u8>>, DriveError> {
        Ok(self.entries.read().await.get(file_id).map(|e| e.bytes.clone()))
    }

    async fn list_files(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| !e.is_folder && e.parent.as_deref() == Some(folder_id))
            .map(|(id, e)| DriveFile {
                id: id.clone(),
                name: e.name.clone(),
            })
            .collect())
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), DriveError> {
        self.entries.write().await.remove(file_id);
        Ok(())
    }
}
