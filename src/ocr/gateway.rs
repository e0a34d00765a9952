//! OCR gateway: normalises image and PDF calls to Mistral OCR.

use super::{DocumentKind, OcrPages};
use crate::error::Result;
use crate::mistral::{ApiKey, DocumentSource, MistralApi, OcrRequest};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Lifetime of the signed URL handed to OCR for uploaded PDFs.
pub const SIGNED_URL_EXPIRY_HOURS: u32 = 1;

#[derive(Clone)]
pub struct OcrGateway {
    api: Arc<dyn MistralApi>,
    model: String,
}

impl OcrGateway {
    pub fn new(api: Arc<dyn MistralApi>, model: impl Into<String>) -> Self {
        Self {
            api,
            model: model.into(),
        }
    }

    /// OCR an image by embedding it as a base64 data URL.
    pub async fn process_image(&self, path: &Path, key: &ApiKey) -> Result<OcrPages> {
        let data_url = image_data_url(path).await?;

        let request = OcrRequest {
            model: self.model.clone(),
            document: DocumentSource::ImageUrl { image_url: data_url },
            include_image_base64: None,
        };
        let pages: OcrPages = self.api.ocr(key, &request).await?.into();
        info!("Image OCR returned {} page(s) for {}", pages.pages.len(), path.display());
        Ok(pages)
    }

    /// OCR a PDF: upload it, get a short-lived signed URL, OCR that URL.
    pub async fn process_pdf(&self, path: &Path, key: &ApiKey) -> Result<OcrPages> {
        let data = tokio::fs::read(path).await?;
        let upload_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");

        let uploaded = self.api.upload_file(key, upload_name, data).await?;
        let signed_url = self
            .api
            .signed_url(key, &uploaded.id, SIGNED_URL_EXPIRY_HOURS)
            .await?;
        debug!("Signed URL issued for file_id={}", uploaded.id);

        let request = OcrRequest {
            model: self.model.clone(),
            document: DocumentSource::DocumentUrl {
                document_url: signed_url,
            },
            include_image_base64: Some(false),
        };
        let pages: OcrPages = self.api.ocr(key, &request).await?.into();
        info!(
            "PDF OCR returned {} page(s), {} embedded image(s) for {}",
            pages.pages.len(),
            pages.image_count(),
            path.display()
        );
        Ok(pages)
    }
}

/// Read an image and encode it as a `data:` URL.
///
/// The MIME type is sniffed from the bytes; the extension is the fallback.
pub async fn image_data_url(path: &Path) -> Result<String> {
    let data = tokio::fs::read(path).await?;
    let mime = sniff_mime(&data).unwrap_or_else(|| {
        DocumentKind::from_path(path)
            .map(DocumentKind::mime_type)
            .unwrap_or("image/jpeg")
    });
    Ok(format!("data:{};base64,{}", mime, BASE64.encode(&data)))
}

fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    match image::guess_format(data).ok()? {
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::Gif => Some("image/gif"),
        image::ImageFormat::WebP => Some("image/webp"),
        image::ImageFormat::Tiff => Some("image/tiff"),
        image::ImageFormat::Bmp => Some("image/bmp"),
        _ => None,
    }
}
