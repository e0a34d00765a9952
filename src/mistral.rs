//! Mistral REST API client: OCR, Files, and chat completions.
//!
//! The pipeline talks to the provider through [`MistralApi`] so it can be
//! driven by a fake in tests. [`MistralClient`] is the real implementation.

use crate::error::{OcrError, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Credential for one request. Never logged.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Header value wins over the environment fallback; blank values count as absent.
    pub fn resolve(header: Option<&str>, fallback: Option<&str>) -> Result<Self> {
        header
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .or_else(|| fallback.map(str::trim).filter(|k| !k.is_empty()))
            .map(|k| Self(k.to_string()))
            .ok_or(OcrError::Auth)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[async_trait::async_trait]
pub trait MistralApi: Send + Sync {
    async fn ocr(&self, key: &ApiKey, request: &OcrRequest) -> Result<OcrResponse>;

    /// Upload raw bytes to the Files API with `purpose=ocr`.
    async fn upload_file(&self, key: &ApiKey, file_name: &str, data: Vec<u8>) -> Result<UploadedFile>;

    /// Issue a signed download URL valid for `expiry_hours`.
    async fn signed_url(&self, key: &ApiKey, file_id: &str, expiry_hours: u32) -> Result<String>;

    /// Chat completion; returns the first choice's message content.
    async fn chat(&self, key: &ApiKey, request: &ChatRequest) -> Result<String>;
}

// ── OCR request/response types ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct OcrRequest {
    pub model: String,
    pub document: DocumentSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_image_base64: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentSource {
    ImageUrl { image_url: String },
    DocumentUrl { document_url: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrResponse {
    pub pages: Vec<OcrResponsePage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrResponsePage {
    pub index: u32,
    pub markdown: String,
    #[serde(default)]
    pub images: Vec<OcrResponseImage>,
}

/// Embedded image reference; PDFs are OCR'd with image data disabled.
#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
pub struct OcrResponseImage {
    pub id: String,
    #[serde(default)]
    pub image_base64: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub id: String,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    url: String,
}

// ── Chat request/response types ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonSchema { json_schema: JsonSchemaFormat },
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub schema: serde_json::Value,
    pub strict: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// User message with an image (data URL) followed by text.
    pub fn user_with_image(data_url: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url.into() },
                },
                ContentPart::Text { text: text.into() },
            ]),
        }
    }
}

// ── HTTP implementation ─────────────────────────────────────────────────────

pub struct MistralClient {
    client: Client,
    base_url: String,
}

impl MistralClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, map non-2xx to `Upstream`, and decode the JSON body.
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let resp = request
            .send()
            .await
            .map_err(|e| OcrError::upstream(operation, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OcrError::Upstream {
                operation,
                status: Some(status.as_u16()),
                message: text,
            });
        }

        let raw = resp
            .text()
            .await
            .map_err(|e| OcrError::upstream(operation, e))?;
        debug!(
            "Mistral {}: raw response ({} bytes): {}",
            operation,
            raw.len(),
            raw.chars().take(500).collect::<String>()
        );

        serde_json::from_str(&raw).map_err(|e| OcrError::Upstream {
            operation,
            status: Some(status.as_u16()),
            message: format!("unexpected response body: {}", e),
        })
    }
}

#[async_trait::async_trait]
impl MistralApi for MistralClient {
    async fn ocr(&self, key: &ApiKey, request: &OcrRequest) -> Result<OcrResponse> {
        info!("Mistral: calling OCR API (model={})", request.model);
        let req = self
            .client
            .post(self.url("/v1/ocr"))
            .bearer_auth(key.expose())
            .json(request);
        self.send("ocr", req).await
    }

    async fn upload_file(&self, key: &ApiKey, file_name: &str, data: Vec<u8>) -> Result<UploadedFile> {
        use reqwest::multipart::{Form, Part};

        info!("Mistral: uploading {} ({} bytes) to Files API", file_name, data.len());

        let part = Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| OcrError::upstream("file upload", e))?;
        let form = Form::new().part("file", part).text("purpose", "ocr");

        let req = self
            .client
            .post(self.url("/v1/files"))
            .bearer_auth(key.expose())
            .multipart(form);
        let uploaded: UploadedFile = self.send("file upload", req).await?;
        info!("Mistral: uploaded file_id={}", uploaded.id);
        Ok(uploaded)
    }

    async fn signed_url(&self, key: &ApiKey, file_id: &str, expiry_hours: u32) -> Result<String> {
        let req = self
            .client
            .get(self.url(&format!("/v1/files/{}/url", file_id)))
            .query(&[("expiry", expiry_hours)])
            .bearer_auth(key.expose());
        let signed: SignedUrlResponse = self.send("signed url", req).await?;
        Ok(signed.url)
    }

    async fn chat(&self, key: &ApiKey, request: &ChatRequest) -> Result<String> {
        debug!("Sending chat request to Mistral: model={}", request.model);

        let req = self
            .client
            .post(self.url("/v1/chat/completions"))
            .bearer_auth(key.expose())
            .json(request);
        let response: ChatCompletionResponse = self.send("chat", req).await?;

        if let Some(usage) = &response.usage {
            info!(
                "Mistral chat response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OcrError::Upstream {
                operation: "chat",
                status: None,
                message: "response had no message content".to_string(),
            })
    }
}
