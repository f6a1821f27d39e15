//! OCR for documents that are not plain text or HTML.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::check_status;
use crate::config::OcrConfig;
use crate::error::{ClientError, ServiceError, ServiceResult};

#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn recognize(&self, file_name: &str, data: &[u8]) -> Result<String, ClientError>;
}

/// Build the OCR client when a base URL is configured
pub fn create_ocr_provider(config: &OcrConfig) -> ServiceResult<Option<Arc<dyn OcrProvider>>> {
    let Some(base_url) = config.base_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    else {
        info!("OCR is not configured; non-text documents will fail extraction");
        return Ok(None);
    };

    info!(url = %base_url, language = %config.language, "Using PaddleOCR service");
    Ok(Some(Arc::new(PaddleOcrClient::new(
        base_url,
        &config.language,
    )?)))
}

/// Client for a PaddleOCR HTTP wrapper (`POST /v1/ocr`)
pub struct PaddleOcrClient {
    client: Client,
    base_url: String,
    language: String,
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    file_name: &'a str,
    content_base64: String,
    language: &'a str,
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    lines: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

impl PaddleOcrClient {
    pub fn new(base_url: &str, language: &str) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            language: language.to_string(),
        })
    }
}

/// Pick the recognised text out of an OCR response
fn response_text(response: OcrResponse) -> Result<String, ClientError> {
    if let Some(error) = response.error.filter(|e| !e.is_empty()) {
        return Err(ClientError::InvalidResponse {
            message: format!("OCR service error: {}", error),
        });
    }
    if !response.text.is_empty() {
        return Ok(response.text);
    }
    if !response.lines.is_empty() {
        return Ok(response.lines.join("\n"));
    }
    Err(ClientError::InvalidResponse {
        message: "OCR returned no text".to_string(),
    })
}

#[async_trait]
impl OcrProvider for PaddleOcrClient {
    async fn recognize(&self, file_name: &str, data: &[u8]) -> Result<String, ClientError> {
        if data.is_empty() {
            return Err(ClientError::InvalidResponse {
                message: "empty OCR payload".to_string(),
            });
        }

        let url = format!("{}/v1/ocr", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&OcrRequest {
                file_name,
                content_base64: STANDARD.encode(data),
                language: &self.language,
            })
            .send()
            .await
            .map_err(|e| ClientError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let body: OcrResponse = check_status(&url, response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse {
                message: e.to_string(),
            })?;

        response_text(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> OcrResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_response_text_prefers_text_then_lines() {
        assert_eq!(
            response_text(parse(r#"{"text": "hello", "lines": ["a"]}"#)).unwrap(),
            "hello"
        );
        assert_eq!(
            response_text(parse(r#"{"lines": ["first", "second"]}"#)).unwrap(),
            "first\nsecond"
        );
    }

    #[test]
    fn test_response_text_errors() {
        assert!(response_text(parse(r#"{"error": "bad image"}"#)).is_err());
        assert!(response_text(parse(r#"{}"#)).is_err());
        assert!(response_text(parse(r#"{"text": "ok", "error": ""}"#)).is_ok());
    }

    #[test]
    fn test_unconfigured_ocr_yields_none() {
        let config = OcrConfig {
            base_url: Some("  ".to_string()),
            language: "en".to_string(),
        };
        assert!(create_ocr_provider(&config).unwrap().is_none());
    }
}
