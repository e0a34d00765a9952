//! Service configuration.
//!
//! Everything comes from the environment (a `.env` file is loaded first by
//! `main`). Only `MISTRAL_API_KEY` matters for correctness; the rest have
//! defaults matching the hosted Mistral API.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "https://api.mistral.ai";
pub const DEFAULT_OCR_MODEL: &str = "mistral-ocr-latest";
pub const DEFAULT_VISION_MODEL: &str = "pixtral-12b-latest";
pub const DEFAULT_TEXT_MODEL: &str = "ministral-8b-latest";

const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_MAX_UPLOAD_MB: usize = 50;

/// Model identifiers used for each provider call.
#[derive(Debug, Clone)]
pub struct Models {
    pub ocr: String,
    /// Chat model for image uploads (receives the image alongside the OCR text).
    pub vision: String,
    /// Chat model for PDFs (OCR text only).
    pub text: String,
}

impl Default for Models {
    fn default() -> Self {
        Self {
            ocr: DEFAULT_OCR_MODEL.to_string(),
            vision: DEFAULT_VISION_MODEL.to_string(),
            text: DEFAULT_TEXT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub api_url: String,
    /// Fallback credential when a request carries no `X-API-Key`.
    pub default_api_key: Option<String>,
    /// Parent directory for per-request temp dirs; system default when unset.
    pub temp_root: Option<PathBuf>,
    pub max_upload_bytes: usize,
    pub models: Models,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind = var("STRUCTURED_OCR_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("Invalid STRUCTURED_OCR_BIND: {}", bind))?;

        let max_upload_mb = match var("STRUCTURED_OCR_MAX_UPLOAD_MB") {
            Some(v) => v
                .parse::<usize>()
                .with_context(|| format!("Invalid STRUCTURED_OCR_MAX_UPLOAD_MB: {}", v))?,
            None => DEFAULT_MAX_UPLOAD_MB,
        };

        let defaults = Models::default();
        Ok(Self {
            bind_addr,
            api_url: var("MISTRAL_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            default_api_key: var("MISTRAL_API_KEY"),
            temp_root: var("STRUCTURED_OCR_TMP_DIR").map(PathBuf::from),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            models: Models {
                ocr: var("MISTRAL_OCR_MODEL").unwrap_or(defaults.ocr),
                vision: var("MISTRAL_VISION_MODEL").unwrap_or(defaults.vision),
                text: var("MISTRAL_TEXT_MODEL").unwrap_or(defaults.text),
            },
        })
    }
}
