//! Structured OCR pipeline: dispatch, OCR, schema-constrained parse, assembly.

use crate::config::Models;
use crate::error::Result;
use crate::mistral::{ApiKey, ChatRequest, JsonSchemaFormat, Message, MistralApi, ResponseFormat};
use crate::ocr::gateway::{image_data_url, OcrGateway};
use crate::ocr::DocumentKind;
use crate::schema::{self, ParsedDocument, StructuredResult};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const CONVERT_INSTRUCTION: &str =
    "Convert this into a structured JSON response with the OCR contents in a sensible dictionary.";

/// Pipeline orchestrator. Cheap to clone; shared across requests.
#[derive(Clone)]
pub struct Extractor {
    api: Arc<dyn MistralApi>,
    gateway: OcrGateway,
    models: Models,
    default_api_key: Option<String>,
}

impl Extractor {
    pub fn new(api: Arc<dyn MistralApi>, models: Models, default_api_key: Option<String>) -> Self {
        Self {
            gateway: OcrGateway::new(api.clone(), models.ocr.clone()),
            api,
            models,
            default_api_key,
        }
    }

    /// Run the full pipeline on a file already saved to disk.
    ///
    /// Credential and extension are checked before any provider call.
    pub async fn extract(&self, path: &Path, header_key: Option<&str>) -> Result<StructuredResult> {
        let key = ApiKey::resolve(header_key, self.default_api_key.as_deref())?;
        let kind = DocumentKind::from_path(path)?;

        info!("Starting structured OCR for {} ({:?})", path.display(), kind);

        let (parsed, raw_markdown) = if kind.is_image() {
            let pages = self.gateway.process_image(path, &key).await?;
            let markdown = pages.first_page_markdown()?.to_string();
            let parsed = self.parse_image(path, &markdown, &key).await?;
            (parsed, markdown)
        } else {
            let pages = self.gateway.process_pdf(path, &key).await?;
            let markdown = pages.joined_markdown();
            let parsed = self.parse_pdf(&markdown, &key).await?;
            (parsed, markdown)
        };

        Ok(schema::assemble(parsed, raw_markdown))
    }

    /// Vision model sees the image itself plus its OCR text.
    async fn parse_image(&self, path: &Path, markdown: &str, key: &ApiKey) -> Result<ParsedDocument> {
        let data_url = image_data_url(path).await?;
        let message = Message::user_with_image(data_url, image_prompt(markdown));
        self.parse(&self.models.vision, message, key).await
    }

    async fn parse_pdf(&self, markdown: &str, key: &ApiKey) -> Result<ParsedDocument> {
        let message = Message::user(pdf_prompt(markdown));
        self.parse(&self.models.text, message, key).await
    }

    async fn parse(&self, model: &str, message: Message, key: &ApiKey) -> Result<ParsedDocument> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![message],
            temperature: 0.0,
            response_format: Some(ResponseFormat::JsonSchema {
                json_schema: JsonSchemaFormat {
                    name: schema::SCHEMA_NAME.to_string(),
                    schema: schema::parsed_document_schema(),
                    strict: true,
                },
            }),
        };

        debug!("Calling {} for structured parse", model);
        let content = self.api.chat(key, &request).await?;
        debug!("Structured parse response: {} chars", content.len());

        schema::parse_document(&content)
    }
}

fn image_prompt(markdown: &str) -> String {
    format!(
        "This is the image's OCR in markdown:\n<BEGIN_IMAGE_OCR>\n{}\n<END_IMAGE_OCR>.\n{}",
        markdown, CONVERT_INSTRUCTION
    )
}

fn pdf_prompt(markdown: &str) -> String {
    format!(
        "This is the PDF's OCR in markdown:\n<BEGIN_PDF_OCR>\n{}\n<END_PDF_OCR>.\n{}",
        markdown, CONVERT_INSTRUCTION
    )
}
