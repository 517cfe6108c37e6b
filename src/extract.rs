//! Document → text extraction.
//!
//! Extractors return the document's text in reading order, page after page,
//! with no separators beyond what the source yields. An empty string is a
//! valid result; deciding that it is unusable is the pipeline's job.

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("Document is not valid UTF-8 text: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("Failed to parse PDF: {0}")]
    Pdf(String),
    #[error("Unsupported document format: {0}")]
    Unsupported(String),
}

/// Common interface for document text extraction.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, document: &[u8]) -> Result<String, ExtractError>;
}

/// Formats recognized by [`DocumentExtractor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    PlainText,
}

/// PDF readers accept the header anywhere in the first kilobyte.
const PDF_HEADER_WINDOW: usize = 1024;

impl DocumentFormat {
    /// Sniff the format from the leading bytes.
    pub fn detect(document: &[u8]) -> Self {
        let head = &document[..document.len().min(PDF_HEADER_WINDOW)];
        if head.windows(5).any(|w| w == b"%PDF-") {
            DocumentFormat::Pdf
        } else {
            DocumentFormat::PlainText
        }
    }
}

/// UTF-8 text files.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, document: &[u8]) -> Result<String, ExtractError> {
        let text = std::str::from_utf8(document)?;
        Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
    }
}

/// PDF documents, via `pdf-extract`.
#[cfg(feature = "pdf")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

#[cfg(feature = "pdf")]
impl TextExtractor for PdfExtractor {
    fn extract_text(&self, document: &[u8]) -> Result<String, ExtractError> {
        // pdf-extract panics on some malformed inputs instead of erroring.
        match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(document)) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
            Err(_) => Err(ExtractError::Pdf("parser aborted on malformed input".to_string())),
        }
    }
}

/// Picks an extractor from the document's magic bytes. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentExtractor;

impl TextExtractor for DocumentExtractor {
    fn extract_text(&self, document: &[u8]) -> Result<String, ExtractError> {
        match DocumentFormat::detect(document) {
            DocumentFormat::PlainText => PlainTextExtractor.extract_text(document),
            #[cfg(feature = "pdf")]
            DocumentFormat::Pdf => PdfExtractor.extract_text(document),
            #[cfg(not(feature = "pdf"))]
            DocumentFormat::Pdf => Err(ExtractError::Unsupported(
                "PDF support is disabled; enable the `pdf` feature".to_string(),
            )),
        }
    }
}
