//! Plain-text extraction from uploaded bytes, dispatched on file extension.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::clients::{OcrProvider, with_timeout};
use crate::db::models::file_extension;
use crate::error::{ClientError, ExtractionError};

/// How a file is turned into text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    PlainText,
    Html,
    Ocr,
}

impl SourceFormat {
    pub fn for_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "txt" | "md" | "csv" | "log" | "json" => SourceFormat::PlainText,
            "html" | "htm" => SourceFormat::Html,
            _ => SourceFormat::Ocr,
        }
    }
}

pub struct TextExtractor {
    ocr: Option<Arc<dyn OcrProvider>>,
    ocr_timeout: Duration,
}

impl TextExtractor {
    pub fn new(ocr: Option<Arc<dyn OcrProvider>>, ocr_timeout: Duration) -> Self {
        Self { ocr, ocr_timeout }
    }

    /// Extract text from `data`, choosing the method from `file_name`'s extension.
    /// Blank results are an error.
    pub async fn extract(&self, file_name: &str, data: &[u8]) -> Result<String, ExtractionError> {
        let format = SourceFormat::for_extension(&file_extension(file_name));
        debug!(file_name = %file_name, ?format, bytes = data.len(), "Extracting text");

        let text = match format {
            SourceFormat::PlainText => String::from_utf8_lossy(data).into_owned(),
            SourceFormat::Html => {
                let text = strip_html_tags(&String::from_utf8_lossy(data));
                if text.trim().is_empty() {
                    return Err(ExtractionError::EmptyHtml);
                }
                text
            }
            SourceFormat::Ocr => self.recognize(file_name, data).await?,
        };

        if text.trim().is_empty() {
            return Err(ExtractionError::EmptyText);
        }
        Ok(text)
    }

    async fn recognize(&self, file_name: &str, data: &[u8]) -> Result<String, ExtractionError> {
        let to_error = |source| ExtractionError::Ocr {
            file_name: file_name.to_string(),
            source,
        };

        let Some(ocr) = &self.ocr else {
            return Err(to_error(ClientError::NotConfigured {
                client: "OCR provider",
            }));
        };

        with_timeout("OCR", self.ocr_timeout, ocr.recognize(file_name, data))
            .await
            .map_err(to_error)
    }
}

/// Strip HTML tags, dropping `<script>`/`<style>` bodies and collapsing
/// whitespace, then decode the common entities.
pub fn strip_html_tags(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut tag = String::new();
    let mut skip_until: Option<&'static str> = None;
    let mut last_was_space = true;

    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                let closing = tag.starts_with('/');

                match (skip_until, closing, name.as_str()) {
                    (None, false, "script") => skip_until = Some("script"),
                    (None, false, "style") => skip_until = Some("style"),
                    (Some(open), true, n) if n == open => skip_until = None,
                    _ => {}
                }

                // Tags separate words
                if !last_was_space {
                    result.push(' ');
                    last_was_space = true;
                }
            }
            _ if in_tag => tag.push(c),
            _ if skip_until.is_some() => {}
            _ if c.is_whitespace() => {
                if !last_was_space {
                    result.push(' ');
                    last_was_space = true;
                }
            }
            _ => {
                result.push(c);
                last_was_space = false;
            }
        }
    }

    result
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}
