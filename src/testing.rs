//! In-memory `MistralApi` used by unit tests. Records every call.

use crate::error::{OcrError, Result};
use crate::mistral::{
    ApiKey, ChatRequest, MistralApi, OcrRequest, OcrResponse, OcrResponsePage, UploadedFile,
};
use std::sync::Mutex;

/// PNG signature followed by padding; enough for format sniffing.
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

pub const GREETING_REPLY: &str = r#"{"file_name":"x.png","topics":["greeting"],"languages":["English"],"ocr_contents":{"greeting":"Hello World"}}"#;

#[derive(Debug, Clone)]
pub enum Call {
    Ocr(OcrRequest),
    Upload { file_name: String, size: usize },
    SignedUrl { file_id: String, expiry_hours: u32 },
    Chat(ChatRequest),
}

pub struct FakeMistral {
    calls: Mutex<Vec<Call>>,
    pages: Vec<String>,
    chat_reply: String,
    fail_upload: bool,
    fail_signed_url: bool,
    fail_ocr: bool,
}

impl FakeMistral {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            pages: vec!["Hello World".to_string()],
            chat_reply: GREETING_REPLY.to_string(),
            fail_upload: false,
            fail_signed_url: false,
            fail_ocr: false,
        }
    }

    pub fn with_pages(mut self, pages: &[&str]) -> Self {
        self.pages = pages.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_chat_reply(mut self, reply: impl Into<String>) -> Self {
        self.chat_reply = reply.into();
        self
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub fn failing_signed_url(mut self) -> Self {
        self.fail_signed_url = true;
        self
    }

    pub fn failing_ocr(mut self) -> Self {
        self.fail_ocr = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn upstream(operation: &'static str, status: u16) -> OcrError {
    OcrError::Upstream {
        operation,
        status: Some(status),
        message: "fake failure".to_string(),
    }
}

#[async_trait::async_trait]
impl MistralApi for FakeMistral {
    async fn ocr(&self, _key: &ApiKey, request: &OcrRequest) -> Result<OcrResponse> {
        self.record(Call::Ocr(request.clone()));
        if self.fail_ocr {
            return Err(upstream("ocr", 503));
        }
        Ok(OcrResponse {
            pages: self
                .pages
                .iter()
                .enumerate()
                .map(|(i, markdown)| OcrResponsePage {
                    index: i as u32,
                    markdown: markdown.clone(),
                    images: Vec::new(),
                })
                .collect(),
        })
    }

    async fn upload_file(&self, _key: &ApiKey, file_name: &str, data: Vec<u8>) -> Result<UploadedFile> {
        self.record(Call::Upload {
            file_name: file_name.to_string(),
            size: data.len(),
        });
        if self.fail_upload {
            return Err(upstream("file upload", 500));
        }
        Ok(UploadedFile {
            id: "file-123".to_string(),
        })
    }

    async fn signed_url(&self, _key: &ApiKey, file_id: &str, expiry_hours: u32) -> Result<String> {
        self.record(Call::SignedUrl {
            file_id: file_id.to_string(),
            expiry_hours,
        });
        if self.fail_signed_url {
            return Err(upstream("signed url", 403));
        }
        Ok(format!("https://files.example/{}?sig=abc", file_id))
    }

    async fn chat(&self, _key: &ApiKey, request: &ChatRequest) -> Result<String> {
        self.record(Call::Chat(request.clone()));
        Ok(self.chat_reply.clone())
    }
}
