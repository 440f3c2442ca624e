use std::env;

use async_trait::async_trait;
use reqwest::{Client, Response};

use super::{DriveApi, DriveFile, dto};
use crate::error::{AppError, DriveError};

const API_BASE: &str = "https://www.googleapis.com";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const JSON_MIME: &str = "application/json";

#[derive(Clone, Debug)]
pub struct DriveConfig {
    pub access_token: String,
    pub root_folder: String,
    pub api_base: String,
}

impl DriveConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let access_token = env::var("DRIVE_ACCESS_TOKEN")
            .map_err(|_| AppError::Config("DRIVE_ACCESS_TOKEN is not set".to_string()))?;
        let root_folder = env::var("DRIVE_ROOT_FOLDER")
            .unwrap_or_else(|_| "course-store/courses".to_string());

        Ok(Self {
            access_token,
            root_folder,
            api_base: env::var("DRIVE_API_BASE").unwrap_or_else(|_| API_BASE.to_string()),
        })
    }
}

/// Google Drive v3 over plain REST.
pub struct GoogleDriveClient {
    client: Client,
    config: DriveConfig,
}

impl GoogleDriveClient {
    pub fn new(config: DriveConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.config.api_base)
    }

    fn upload_url(&self, file_id: &str) -> String {
        format!("{}/upload/drive/v3/files/{}", self.config.api_base, file_id)
    }

    async fn search(&self, query: &str) -> Result<Vec<dto::FileResource>, DriveError> {
        let mut found = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.to_string()),
                ("fields", "nextPageToken, files(id, name)".to_string()),
                ("spaces", "drive".to_string()),
                ("pageSize", "1000".to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let response = self.client
                .get(self.files_url())
                .bearer_auth(&self.config.access_token)
                .query(&params)
                .send()
                .await?;
            let list: dto::FileList = check(response).await?.json().await?;

            found.extend(list.files);
            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(found)
    }

    async fn create_metadata(&self, name: &str, mime_type: &str, parent: Option<&str>) -> Result<String, DriveError> {
        let request = dto::CreateFileRequest {
            name,
            mime_type,
            parents: parent.into_iter().collect(),
        };

        let response = self.client
            .post(self.files_url())
            .bearer_auth(&self.config.access_token)
            .json(&request)
            .send()
            .await?;
        let created: dto::FileResource = check(response).await?.json().await?;
        Ok(created.id)
    }
}

#[async_trait]
impl DriveApi for GoogleDriveClient {
    async fn find_folder(&self, name: &str, parent: Option<&str>) -> Result<Option<String>, DriveError> {
        let mut query = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            escape(name),
            FOLDER_MIME
        );
        if let Some(parent) = parent {
            query.push_str(&format!(" and '{}' in parents", escape(parent)));
        }
        Ok(self.search(&query).await?.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String, DriveError> {
        self.create_metadata(name, FOLDER_MIME, parent).await
    }

    async fn find_file(&self, name: &str, folder_id: &str) -> Result<Option<String>, DriveError> {
        let query = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape(name),
            escape(folder_id)
        );
        let files = self.search(&query).await?;
        if files.len() > 1 {
            tracing::warn!("{} drive files named {}, using the first", files.len(), name);
        }
        Ok(files.into_iter().next().map(|f| f.id))
    }

    async fn create_file(&self, name: &str, folder_id: &str, bytes: Vec<u8>) -> Result<String, DriveError> {
        let file_id = self.create_metadata(name, JSON_MIME, Some(folder_id)).await?;
        self.update_file(&file_id, bytes).await?;
        Ok(file_id)
    }

    async fn update_file(&self, file_id: &str, bytes: Vec<u8>) -> Result<(), DriveError> {
        let response = self.client
            .patch(self.upload_url(file_id))
            .bearer_auth(&self.config.access_token)
            .query(&[("uploadType", "media")])
            .header(reqwest::header::CONTENT_TYPE, JSON_MIME)
            .body(bytes)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn download(&self, file_id: &str) -> Result<Option<Vec<u8>>, DriveError> {
        let response = self.client
            .get(format!("{}/{}", self.files_url(), file_id))
            .bearer_auth(&self.config.access_token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        Ok(Some(check(response).await?.bytes().await?.to_vec()))
    }

    async fn list_files(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
        let query = format!("'{}' in parents and trashed = false", escape(folder_id));
        Ok(self
            .search(&query)
            .await?
            .into_iter()
            .map(|f| DriveFile { id: f.id, name: f.name })
            .collect())
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), DriveError> {
        let response = self.client
            .delete(format!("{}/{}", self.files_url(), file_id))
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, DriveError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(DriveError::Api { status, body })
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
