use std::env;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Map, Value};

use super::dto;
use super::{MetadataStore, StoredDocument, WriteCondition};
use crate::error::{AppError, MetaError};
use crate::models::{CourseDocument, Lesson};

const API_BASE: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: &str = "300";

#[derive(Clone, Debug)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub access_token: String,
    pub collection: String,
    pub api_base: String,
}

impl FirestoreConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let project_id = env::var("FIRESTORE_PROJECT_ID")
            .map_err(|_| AppError::Config("FIRESTORE_PROJECT_ID is not set".to_string()))?;
        let access_token = env::var("FIRESTORE_ACCESS_TOKEN")
            .map_err(|_| AppError::Config("FIRESTORE_ACCESS_TOKEN is not set".to_string()))?;

        Ok(Self {
            project_id,
            access_token,
            collection: env::var("FIRESTORE_COLLECTION").unwrap_or_else(|_| "courses".to_string()),
            api_base: env::var("FIRESTORE_API_BASE").unwrap_or_else(|_| API_BASE.to_string()),
        })
    }
}

pub struct FirestoreClient {
    client: Client,
    config: FirestoreConfig,
}

impl FirestoreClient {
    pub fn new(config: FirestoreConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            self.config.api_base, self.config.project_id, self.config.collection
        )
    }

    fn document_url(&self, course_id: &str) -> String {
        format!("{}/{}", self.collection_url(), course_id)
    }

    async fn list_documents(&self, url: &str) -> Result<Vec<dto::Document>, MetaError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![("pageSize", PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let response = self.client
                .get(url)
                .bearer_auth(&self.config.access_token)
                .query(&params)
                .send()
                .await?;
            let page: dto::ListDocumentsResponse = check(response).await?.json().await?;

            documents.extend(page.documents);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(documents)
    }
}

fn to_stored(document: &dto::Document) -> Result<StoredDocument, MetaError> {
    let doc: CourseDocument = serde_json::from_value(Value::Object(document.plain_fields()))?;
    Ok(StoredDocument {
        id: document.id().to_string(),
        doc,
        update_time: document.update_time.clone().unwrap_or_default(),
    })
}

#[async_trait]
impl MetadataStore for FirestoreClient {
    async fn get(&self, course_id: &str) -> Result<Option<StoredDocument>, MetaError> {
        let response = self.client
            .get(self.document_url(course_id))
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let document: dto::Document = check(response).await?.json().await?;
        Ok(Some(to_stored(&document)?))
    }

    async fn merge(
        &self,
        course_id: &str,
        fields: Map<String, Value>,
        condition: WriteCondition,
    ) -> Result<(), MetaError> {
        let mut params: Vec<(&str, String)> = fields
            .keys()
            .map(|k| ("updateMask.fieldPaths", k.clone()))
            .collect();
        match condition {
            WriteCondition::Always => {}
            WriteCondition::Absent => params.push(("currentDocument.exists", "false".to_string())),
            WriteCondition::UpdatedAt(time) => params.push(("currentDocument.updateTime", time)),
        }

        let request = dto::WriteRequest {
            fields: dto::to_firestore_fields(&fields),
        };

        let response = self.client
            .patch(self.document_url(course_id))
            .bearer_auth(&self.config.access_token)
            .query(&params)
            .json(&request)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredDocument>, MetaError> {
        let documents = self.list_documents(&self.collection_url()).await?;
        let mut listed = Vec::with_capacity(documents.len());
        for document in &documents {
            match to_stored(document) {
                Ok(stored) => listed.push(stored),
                Err(e) => tracing::warn!("skipping undecodable course document {}: {}", document.id(), e),
            }
        }
        Ok(listed)
    }

    async fn delete(&self, course_id: &str) -> Result<(), MetaError> {
        let response = self.client
            .delete(self.document_url(course_id))
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn legacy_lessons(&self, course_id: &str) -> Result<Vec<Lesson>, MetaError> {
        let url = format!("{}/lessons", self.document_url(course_id));
        let documents = self.list_documents(&url).await?;

        let mut ordered: Vec<(i64, Lesson)> = Vec::with_capacity(documents.len());
        for document in &documents {
            let mut plain = document.plain_fields();
            let order = plain.remove("order").and_then(|o| o.as_i64()).unwrap_or(i64::MAX);
            plain
                .entry("id".to_string())
                .or_insert_with(|| Value::String(document.id().to_string()));
            let lesson: Lesson = serde_json::from_value(Value::Object(plain))?;
            ordered.push((order, lesson));
        }
        ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        Ok(ordered.into_iter().map(|(_, lesson)| lesson).collect())
    }
}

/// Maps Firestore error responses onto `MetaError`.
async fn check(response: Response) -> Result<Response, MetaError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (grpc_status, message) = serde_json::from_str::<dto::ErrorEnvelope>(&body)
        .map(|e| (e.error.status, e.error.message))
        .unwrap_or_else(|_| (String::new(), body.clone()));

    if status == StatusCode::TOO_MANY_REQUESTS || grpc_status == "RESOURCE_EXHAUSTED" {
        return Err(MetaError::QuotaExhausted(message));
    }
    if grpc_status == "FAILED_PRECONDITION" || grpc_status == "ALREADY_EXISTS" || status == StatusCode::CONFLICT {
        return Err(MetaError::Conflict(message));
    }
    Err(MetaError::Transport(format!("{} {}", status, message)))
}
