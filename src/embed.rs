// SPDX-License-Identifier: MIT
//! Embedding contract between the bundling step and the loader
//!
//! The payload travels as the text content of a non-executed placeholder tag:
//!
//! ```text
//! <script type="application/octet-stream" id="data-payload">H4sIAAAA...</script>
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// Default id of the placeholder element
pub const DEFAULT_PAYLOAD_ELEMENT_ID: &str = "data-payload";

/// MIME type of the placeholder tag; browsers will not execute it
pub const PAYLOAD_TAG_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("Payload element '{0}' not found in document")]
    ElementNotFound(String),

    #[error("Payload element '{0}' is empty")]
    EmptyPayload(String),

    #[error("Failed to read payload file {path}: {message}")]
    Io { path: String, message: String },
}

/// Render the placeholder tag holding `payload`
pub fn render_payload_tag(element_id: &str, payload: &str) -> String {
    format!(
        "<script type=\"{}\" id=\"{}\">{}</script>",
        PAYLOAD_TAG_TYPE, element_id, payload
    )
}

/// Insert the payload tag into an HTML document, before `</body>` when present
pub fn embed_payload(document: &str, element_id: &str, payload: &str) -> String {
    let tag = render_payload_tag(element_id, payload);
    match document.rfind("</body>") {
        Some(index) => {
            let mut out = String::with_capacity(document.len() + tag.len() + 1);
            out.push_str(&document[..index]);
            out.push_str(&tag);
            out.push('\n');
            out.push_str(&document[index..]);
            out
        }
        None => format!("{}{}\n", document, tag),
    }
}

/// Text content of the element with the given id, trimmed
pub fn extract_payload<'a>(document: &'a str, element_id: &str) -> Option<&'a str> {
    let needle = format!("id=\"{}\"", element_id);
    let mut search_from = 0;
    while let Some(found) = document[search_from..].find(&needle) {
        let attr = search_from + found;
        search_from = attr + needle.len();

        // Only a whole `id` attribute counts, not `data-id` and the like
        if attr == 0 || !document.as_bytes()[attr - 1].is_ascii_whitespace() {
            continue;
        }
        let Some(tag_start) = document[..attr].rfind('<') else {
            continue;
        };
        if document[tag_start..attr].contains('>') {
            // The match sits in text content, not inside a tag
            continue;
        }
        let tag_name: String = document[tag_start + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        let content_start = attr + document[attr..].find('>')? + 1;
        let closing = format!("</{}>", tag_name);
        let content_end = content_start + document[content_start..].find(&closing)?;
        return Some(document[content_start..content_end].trim());
    }
    None
}

/// Where the loader obtains the payload at `init()` time
pub trait PayloadSource: Send + Sync {
    fn read_payload(&self) -> Result<String, SourceError>;
}

/// A payload already held in memory
#[derive(Debug, Clone)]
pub struct StaticPayload(pub String);

impl PayloadSource for StaticPayload {
    fn read_payload(&self) -> Result<String, SourceError> {
        Ok(self.0.clone())
    }
}

/// A document that carries the payload in its placeholder element
#[derive(Debug, Clone)]
pub struct HtmlDocument {
    html: String,
    element_id: String,
}

impl HtmlDocument {
    pub fn new(html: impl Into<String>) -> Self {
        Self::with_element_id(html, DEFAULT_PAYLOAD_ELEMENT_ID)
    }

    pub fn with_element_id(html: impl Into<String>, element_id: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            element_id: element_id.into(),
        }
    }
}

impl PayloadSource for HtmlDocument {
    fn read_payload(&self) -> Result<String, SourceError> {
        let payload = extract_payload(&self.html, &self.element_id)
            .ok_or_else(|| SourceError::ElementNotFound(self.element_id.clone()))?;
        if payload.is_empty() {
            return Err(SourceError::EmptyPayload(self.element_id.clone()));
        }
        Ok(payload.to_string())
    }
}

/// A file holding either a bare payload or a document that embeds one
#[derive(Debug, Clone)]
pub struct PayloadFile {
    path: PathBuf,
    element_id: String,
}

impl PayloadFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            element_id: DEFAULT_PAYLOAD_ELEMENT_ID.to_string(),
        }
    }

    pub fn with_element_id(mut self, element_id: impl Into<String>) -> Self {
        self.element_id = element_id.into();
        self
    }
}

impl PayloadSource for PayloadFile {
    fn read_payload(&self) -> Result<String, SourceError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| SourceError::Io {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        if text.trim_start().starts_with('<') {
            HtmlDocument::with_element_id(text, self.element_id.clone()).read_payload()
        } else {
            Ok(text.trim().to_string())
        }
    }
}
