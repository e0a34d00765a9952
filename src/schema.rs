//! Structured OCR result types and the schema sent to the LLM.

use crate::error::{OcrError, Result};
use crate::languages::{self, Language};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// Final response record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResult {
    pub file_name: String,
    pub topics: Vec<String>,
    pub languages: Vec<Language>,
    pub ocr_contents: serde_json::Map<String, serde_json::Value>,
    /// OCR text exactly as returned by the provider. Never produced by the LLM.
    pub raw_markdown: String,
}

/// What the LLM is asked to produce: [`StructuredResult`] without `raw_markdown`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParsedDocument {
    pub file_name: String,
    pub topics: Vec<String>,
    pub languages: Vec<Language>,
    pub ocr_contents: serde_json::Map<String, serde_json::Value>,
}

pub const SCHEMA_NAME: &str = "StructuredOCR";

/// JSON schema for [`ParsedDocument`], with languages constrained to the table.
pub fn parsed_document_schema() -> serde_json::Value {
    let language_names: Vec<&str> = languages::names().collect();
    json!({
        "title": SCHEMA_NAME,
        "type": "object",
        "properties": {
            "file_name": {"title": "File Name", "type": "string"},
            "topics": {"title": "Topics", "type": "array", "items": {"type": "string"}},
            "languages": {
                "title": "Languages",
                "type": "array",
                "items": {"type": "string", "enum": language_names}
            },
            "ocr_contents": {"title": "Ocr Contents", "type": "object"}
        },
        "required": ["file_name", "topics", "languages", "ocr_contents"],
        "additionalProperties": false
    })
}

/// Validate an LLM payload against [`ParsedDocument`].
pub fn parse_document(content: &str) -> Result<ParsedDocument> {
    let content = content.trim();
    if content.is_empty() {
        return Err(OcrError::SchemaValidation("empty response".to_string()));
    }
    serde_json::from_str(content).map_err(|e| {
        OcrError::SchemaValidation(format!(
            "{} in: {}",
            e,
            content.chars().take(200).collect::<String>()
        ))
    })
}

/// Join parsed fields with the OCR text.
///
/// An empty `raw_markdown` is logged but tolerated; callers must handle it.
pub fn assemble(parsed: ParsedDocument, raw_markdown: String) -> StructuredResult {
    let mut languages: Vec<Language> = Vec::with_capacity(parsed.languages.len());
    for lang in parsed.languages {
        if !languages.contains(&lang) {
            languages.push(lang);
        }
    }

    let result = StructuredResult {
        file_name: parsed.file_name,
        topics: parsed.topics,
        languages,
        ocr_contents: parsed.ocr_contents,
        raw_markdown,
    };

    if result.raw_markdown.trim().is_empty() {
        warn!("raw_markdown is missing or empty in result for {}", result.file_name);
    } else {
        let codes: Vec<&str> = result.languages.iter().map(Language::code).collect();
        debug!("Raw markdown length: {} (languages: {:?})", result.raw_markdown.len(), codes);
        debug!(
            "Raw markdown snippet: {}...",
            result.raw_markdown.chars().take(100).collect::<String>()
        );
    }

    result
}
