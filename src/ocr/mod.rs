//! OCR stage: document-type dispatch and the OCR gateway.

pub mod gateway;

use crate::error::{OcrError, Result};
use crate::mistral::{OcrResponse, OcrResponseImage};
use std::path::Path;

/// Per-page OCR output, in provider order.
#[derive(Debug, Clone)]
pub struct OcrPage {
    pub index: u32,
    pub markdown: String,
    pub images: Vec<OcrResponseImage>,
}

/// All pages returned by one OCR call.
#[derive(Debug, Clone, Default)]
pub struct OcrPages {
    pub pages: Vec<OcrPage>,
}

impl From<OcrResponse> for OcrPages {
    fn from(resp: OcrResponse) -> Self {
        let mut pages: Vec<OcrPage> = resp
            .pages
            .into_iter()
            .map(|p| OcrPage {
                index: p.index,
                markdown: p.markdown,
                images: p.images,
            })
            .collect();
        pages.sort_by_key(|p| p.index);
        Self { pages }
    }
}

impl OcrPages {
    /// Markdown of the first page. Images only ever yield one page.
    pub fn first_page_markdown(&self) -> Result<&str> {
        self.pages
            .first()
            .map(|p| p.markdown.as_str())
            .ok_or_else(|| OcrError::Upstream {
                operation: "ocr",
                status: None,
                message: "OCR returned no pages".to_string(),
            })
    }

    pub fn image_count(&self) -> usize {
        self.pages.iter().map(|p| p.images.len()).sum()
    }

    /// All pages' markdown joined by a blank line, in page order.
    pub fn joined_markdown(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.markdown.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Processing path selected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Jpeg,
    Png,
    Pdf,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "pdf" => Ok(Self::Pdf),
            _ => Err(OcrError::UnsupportedFormat {
                extension: if extension.is_empty() {
                    String::new()
                } else {
                    format!(".{}", extension)
                },
            }),
        }
    }

    pub fn is_image(self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }

    /// MIME type implied by the extension.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Pdf => "application/pdf",
        }
    }
}
