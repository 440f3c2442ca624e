use std::env;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};

use super::BlobTransport;
use super::dto;
use crate::error::{AppError, BlobError};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

impl TelegramConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let bot_token = env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| AppError::Config("TELEGRAM_BOT_TOKEN is not set".to_string()))?;
        let chat_id = env::var("TELEGRAM_CHAT_ID")
            .map_err(|_| AppError::Config("TELEGRAM_CHAT_ID is not set".to_string()))?;

        Ok(Self {
            bot_token,
            chat_id,
            api_base: env::var("TELEGRAM_API_BASE").unwrap_or_else(|_| API_BASE.to_string()),
        })
    }
}

/// Stores blobs as documents posted to a private chat; the returned
/// `file_id` is the blob identifier.
pub struct TelegramTransport {
    client: Client,
    config: TelegramConfig,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.config.api_base, self.config.bot_token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.config.api_base, self.config.bot_token, file_path)
    }
}

#[async_trait]
impl BlobTransport for TelegramTransport {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, BlobError> {
        let file_name = format!("{}.json", key.replace('/', "_"));
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/json")?;
        let form = Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("disable_notification", "true")
            .part("document", part);

        let response = self.client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 413 {
            return Err(BlobError::Rejected {
                status: 413,
                body: "request entity too large".to_string(),
            });
        }

        let body: dto::BotResponse<dto::Message> = response.json().await?;
        if !body.ok {
            return Err(BlobError::Rejected {
                status: body.error_code.unwrap_or(status.as_u16()),
                body: body.description.unwrap_or_default(),
            });
        }

        body.result
            .and_then(|message| message.document)
            .map(|document| document.file_id)
            .ok_or_else(|| BlobError::Transport("sendDocument returned no document".to_string()))
    }

    async fn download(&self, file_id: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let response = self.client
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()
            .await?;

        let status = response.status();
        let body: dto::BotResponse<dto::File> = response.json().await?;
        if !body.ok {
            // Unknown or expired file ids come back as 400.
            if body.error_code == Some(400) || status.as_u16() == 400 {
                tracing::warn!(
                    "blob {} not found: {}",
                    file_id,
                    body.description.unwrap_or_default()
                );
                return Ok(None);
            }
            return Err(BlobError::Rejected {
                status: body.error_code.unwrap_or(status.as_u16()),
                body: body.description.unwrap_or_default(),
            });
        }

        let Some(file_path) = body.result.and_then(|f| f.file_path) else {
            return Ok(None);
        };

        let response = self.client.get(self.file_url(&file_path)).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BlobError::Rejected { status, body });
        }

        Ok(Some(response.bytes().await?.to_vec()))
    }
}
