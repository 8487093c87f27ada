// src/services/ingestion.rs
// PDF ingestion: structural checks locally, text extraction through Gemini's document input
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::gemini_client::GeminiClient;
use crate::types::ExtractedDocument;
use crate::workflow::executor::StageError;
use crate::workflow::stages::DocumentIngestor;

/// Inline document limit of the generateContent endpoint
pub const MAX_INLINE_PDF_BYTES: usize = 20 * 1024 * 1024;

const EXTRACTION_PROMPT: &str = "Extract the complete text of this document in reading order. \
Keep headings and paragraph breaks, skip page numbers and running headers. \
Output ONLY the extracted text, without commentary.";

lazy_static! {
    static ref PAGE_OBJECT: Regex = Regex::new(r"/Type\s*/Page\b").unwrap();
    static ref INFO_ENTRY: Regex = Regex::new(r"/(Title|Author|Subject|Keywords|Creator|Producer)\s*\(([^)]{1,512})\)").unwrap();
}

/// What can be learned from the raw bytes without a PDF parser
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfInspection {
    pub page_count: u32,
    pub metadata: HashMap<String, String>,
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

/// Count page objects and read plain (unencoded) info dictionary strings
pub fn inspect_pdf(bytes: &[u8]) -> Result<PdfInspection, String> {
    if !is_pdf(bytes) {
        return Err("not a PDF file (missing %PDF- header)".to_string());
    }

    let page_count = PAGE_OBJECT.find_iter(bytes).count() as u32;
    let mut metadata = HashMap::new();
    for captures in INFO_ENTRY.captures_iter(bytes) {
        let key = String::from_utf8_lossy(&captures[1]).to_lowercase();
        let value = String::from_utf8_lossy(&captures[2]).trim().to_string();
        if !value.is_empty() {
            metadata.entry(key).or_insert(value);
        }
    }

    Ok(PdfInspection { page_count, metadata })
}

/// Metadata title, else the first meaningful line of text, else the file stem
pub fn pick_title(metadata: &HashMap<String, String>, full_text: &str, path: &str) -> String {
    if let Some(title) = metadata.get("title").filter(|t| !t.trim().is_empty()) {
        return title.trim().to_string();
    }
    if let Some(line) = full_text
        .lines()
        .map(|l| l.trim().trim_start_matches('#').trim())
        .find(|l| l.chars().count() >= 4)
    {
        return line.chars().take(120).collect();
    }
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown Title".to_string())
}

pub struct PdfIngestor {
    client: Arc<GeminiClient>,
}

impl PdfIngestor {
    pub fn new(client: Arc<GeminiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentIngestor for PdfIngestor {
    async fn extract(&self, path: &str) -> Result<ExtractedDocument, StageError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StageError::Ingestion(format!("could not read {}: {}", path, e)))?;
        if bytes.len() > MAX_INLINE_PDF_BYTES {
            return Err(StageError::Ingestion(format!(
                "document is {} bytes, the limit is {}",
                bytes.len(),
                MAX_INLINE_PDF_BYTES
            )));
        }
        let inspection = inspect_pdf(&bytes).map_err(StageError::Ingestion)?;
        tracing::info!("📄 Ingesting {} ({} pages, {} bytes)", path, inspection.page_count, bytes.len());

        let full_text = self
            .client
            .generate_with_document(EXTRACTION_PROMPT, &bytes, "application/pdf")
            .await?;
        let full_text = full_text.trim().to_string();
        if full_text.is_empty() {
            return Err(StageError::Ingestion("document has no extractable text".to_string()));
        }

        let title = pick_title(&inspection.metadata, &full_text, path);
        tracing::info!("✅ Extracted '{}' ({} chars)", title, full_text.len());
        Ok(ExtractedDocument {
            title,
            full_text,
            page_count: inspection.page_count,
            metadata: inspection.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINI_PDF: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
4 0 obj << /Type/Page /Parent 2 0 R >> endobj\n\
5 0 obj << /Title (Sleep and Memory) /Author (A. Researcher) >> endobj\n%%EOF";

    #[test]
    fn test_inspect_counts_pages_not_page_trees() {
        let inspection = inspect_pdf(MINI_PDF).unwrap();
        assert_eq!(inspection.page_count, 2);
        assert_eq!(inspection.metadata.get("title").map(String::as_str), Some("Sleep and Memory"));
        assert_eq!(inspection.metadata.get("author").map(String::as_str), Some("A. Researcher"));
    }

    #[test]
    fn test_non_pdf_is_rejected() {
        assert!(inspect_pdf(b"PK\x03\x04 zip data").is_err());
        assert!(!is_pdf(b""));
    }

    #[test]
    fn test_title_fallbacks() {
        let mut metadata = HashMap::new();
        assert_eq!(pick_title(&metadata, "\n\n# Deep Sleep Study\nbody", "x.pdf"), "Deep Sleep Study");
        assert_eq!(pick_title(&metadata, "", "/tmp/paper_v2.pdf"), "paper_v2");
        metadata.insert("title".to_string(), "From Info".to_string());
        assert_eq!(pick_title(&metadata, "Other", "x.pdf"), "From Info");
    }

    #[tokio::test]
    async fn test_ingestor_rejects_non_pdf_before_calling_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"just some text").unwrap();

        let ingestor = PdfIngestor::new(Arc::new(GeminiClient::new("key".to_string(), "model".to_string())));
        let err = ingestor.extract(&path.to_string_lossy()).await.unwrap_err();
        assert!(matches!(err, StageError::Ingestion(_)));

        let missing = ingestor.extract("/definitely/missing.pdf").await.unwrap_err();
        assert!(matches!(missing, StageError::Ingestion(_)));
    }
}
