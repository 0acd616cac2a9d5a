//! Text extraction capability.
//!
//! PDF parsing and OCR live in an external service; this module only knows
//! the capability contract: given a blob URL and a MIME type, return the
//! complete page/line tree with a confidence value, or a typed failure.
//! Partial success does not exist - a response that fails to deserialize
//! into the full tree is a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{AppError, Result};
use crate::utils::retry::retry_with_backoff;

/// One extracted line with its position on the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLine {
    /// 1-based line number within the page.
    pub line_no: u32,
    /// Raw line text (not yet normalized).
    pub text: String,
}

/// One extracted page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedPage {
    /// 1-based page number.
    pub page_no: u32,
    /// Lines in reading order.
    pub lines: Vec<ExtractedLine>,
}

/// Complete extraction result for a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedText {
    /// Pages in order.
    pub pages: Vec<ExtractedPage>,
    /// Extractor confidence in [0, 1].
    pub confidence: f32,
    /// Extraction method reported by the service (e.g. "pdftext", "ocr").
    pub method: String,
}

/// Text extraction capability.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract the full text tree from the file at `blob_url`.
    async fn extract(&self, blob_url: &str, mime: &str) -> Result<ExtractedText>;
}

// ============= Remote extraction service =============

#[derive(Serialize)]
struct ExtractRequest<'a> {
    url: &'a str,
    mime: &'a str,
}

/// Client for the HTTP extraction service.
///
/// `POST {base_url}/extract` with `{url, mime}`; the service answers with
/// the full [`ExtractedText`] tree as JSON.
pub struct RemoteTextExtractor {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RemoteTextExtractor {
    /// Create a client for the extraction service at `base_url`.
    pub fn new(base_url: String, api_key: Option<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn extract_once(&self, blob_url: &str, mime: &str) -> Result<ExtractedText> {
        let mut request = self
            .client
            .post(format!("{}/extract", self.base_url))
            .json(&ExtractRequest { url: blob_url, mime });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| AppError::ExtractionFailed {
            message: format!("extraction service unreachable: {}", e),
            retryable: true,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExtractionFailed {
                message: format!("extraction service returned {}: {}", status, body),
                retryable: status.is_server_error() || status.as_u16() == 429,
            });
        }

        response
            .json::<ExtractedText>()
            .await
            .map_err(|e| AppError::ExtractionFailed {
                message: format!("malformed extraction response: {}", e),
                retryable: false,
            })
    }
}

#[async_trait]
impl TextExtractor for RemoteTextExtractor {
    async fn extract(&self, blob_url: &str, mime: &str) -> Result<ExtractedText> {
        retry_with_backoff("extract", || self.extract_once(blob_url, mime)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracted_text_round_trips_as_json() {
        let tree = ExtractedText {
            pages: vec![ExtractedPage {
                page_no: 1,
                lines: vec![ExtractedLine {
                    line_no: 1,
                    text: "Sigortalılık süresi".to_string(),
                }],
            }],
            confidence: 0.93,
            method: "pdftext".to_string(),
        };
        let json = serde_json::to_string(&tree).unwrap();
        let back: ExtractedText = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pages.len(), 1);
        assert_eq!(back.pages[0].lines[0].text, "Sigortalılık süresi");
    }
}
