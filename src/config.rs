// SPDX-License-Identifier: MIT
use thiserror::Error;

use crate::embed::{HtmlDocument, PayloadFile, DEFAULT_PAYLOAD_ELEMENT_ID};
use crate::loader::{ColumnRequest, LoaderConfig};
use crate::payload::DEFAULT_GZIP_LEVEL;
use crate::worker::DEFAULT_QUEUE_CAPACITY;
use crate::writer::ContainerWriter;

const MAX_QUEUE_CAPACITY: usize = 65536;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("COLPACK_GZIP_LEVEL must be between 0 and 9, got {0}")]
    GzipLevel(u32),

    #[error("COLPACK_PAYLOAD_ELEMENT_ID cannot be empty")]
    EmptyElementId,

    #[error("COLPACK_WORKER_QUEUE_CAPACITY must be between 1 and 65536, got {0}")]
    QueueCapacity(usize),

    #[error("COLPACK_PRELOAD_COLUMNS entry '{0}' is not of the form category:column")]
    PreloadEntry(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gzip_level: u32,
    pub payload_element_id: String,
    /// Raw `category:column` entries, checked by `validate`
    pub preload_columns: Vec<String>,
    pub worker_queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            gzip_level: lookup("COLPACK_GZIP_LEVEL")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_GZIP_LEVEL),
            payload_element_id: lookup("COLPACK_PAYLOAD_ELEMENT_ID")
                .unwrap_or_else(|| DEFAULT_PAYLOAD_ELEMENT_ID.to_string()),
            preload_columns: lookup("COLPACK_PRELOAD_COLUMNS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|entry| !entry.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            worker_queue_capacity: lookup("COLPACK_WORKER_QUEUE_CAPACITY")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gzip_level > 9 {
            return Err(ConfigError::GzipLevel(self.gzip_level));
        }

        if self.payload_element_id.trim().is_empty() {
            return Err(ConfigError::EmptyElementId);
        }

        if self.worker_queue_capacity < 1 || self.worker_queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::QueueCapacity(self.worker_queue_capacity));
        }

        if let Some(bad) = self
            .preload_columns
            .iter()
            .find(|entry| ColumnRequest::parse(entry).is_none())
        {
            return Err(ConfigError::PreloadEntry(bad.clone()));
        }

        Ok(())
    }

    /// Writer using the configured compression level
    pub fn packer(&self) -> ContainerWriter {
        ContainerWriter::new().with_gzip_level(self.gzip_level)
    }

    /// Loader settings; malformed preload entries are dropped
    pub fn loader(&self) -> LoaderConfig {
        LoaderConfig {
            common_columns: self
                .preload_columns
                .iter()
                .filter_map(|entry| ColumnRequest::parse(entry))
                .collect(),
            worker_queue_capacity: Some(self.worker_queue_capacity),
        }
    }

    pub fn html_document(&self, html: impl Into<String>) -> HtmlDocument {
        HtmlDocument::with_element_id(html, self.payload_element_id.clone())
    }

    pub fn payload_file(&self, path: impl Into<std::path::PathBuf>) -> PayloadFile {
        PayloadFile::new(path).with_element_id(self.payload_element_id.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
