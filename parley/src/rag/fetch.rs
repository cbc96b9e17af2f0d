//! Document fetching and mime-aware text normalization.
//!
//! The fetcher is a seam: production deployments can plug in converters for PDFs or
//! office formats. The default covers http(s) URLs, local files, and inline text.

use async_trait::async_trait;

use crate::rag::IngestError;

/// Raw fetched content plus provenance.
#[derive(Clone, Debug)]
pub struct FetchedDocument {
    pub content: String,
    pub mime_type: String,
    pub source_type: String,
    pub source_uri: String,
}

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<FetchedDocument, IngestError>;
}

/// Default fetcher: `http(s)://` via GET, `file://` or existing paths from disk,
/// anything else treated as inline text.
pub struct DefaultFetcher {
    http: reqwest::Client,
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DocumentFetcher for DefaultFetcher {
    async fn fetch(&self, source: &str) -> Result<FetchedDocument, IngestError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let response = self
                .http
                .get(source)
                .send()
                .await
                .map_err(|e| IngestError::Fetch(e.to_string()))?;
            if !response.status().is_success() {
                return Err(IngestError::Fetch(format!(
                    "GET {source} returned {}",
                    response.status()
                )));
            }
            let mime_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                .unwrap_or_else(|| "text/plain".to_string());
            let content = response
                .text()
                .await
                .map_err(|e| IngestError::Fetch(e.to_string()))?;
            return Ok(FetchedDocument {
                content,
                mime_type,
                source_type: "url".to_string(),
                source_uri: source.to_string(),
            });
        }

        let path = source.strip_prefix("file://").unwrap_or(source);
        if std::path::Path::new(path).is_file() {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| IngestError::Fetch(format!("read {path}: {e}")))?;
            return Ok(FetchedDocument {
                content,
                mime_type: "text/plain".to_string(),
                source_type: "file".to_string(),
                source_uri: source.to_string(),
            });
        }

        Ok(FetchedDocument {
            content: source.to_string(),
            mime_type: "text/plain".to_string(),
            source_type: "inline".to_string(),
            source_uri: "inline".to_string(),
        })
    }
}

/// Mime-aware normalization: strips html tags, collapses CRLF, trims trailing
/// whitespace per line. Output feeds the hash, so it must be deterministic.
pub fn normalize_content(content: &str, mime_type: &str) -> String {
    let text = if mime_type.contains("html") {
        strip_tags(content)
    } else {
        content.to_string()
    };
    let mut out = String::with_capacity(text.len());
    for line in text.replace("\r\n", "\n").lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
