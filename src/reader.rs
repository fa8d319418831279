// SPDX-License-Identifier: MIT
//! Container reader: decompress once, extract columns on demand
//!
//! Extraction always copies into a freshly allocated typed buffer. The copy
//! is what gets moved to another thread, so it must never alias the shared
//! decompressed buffer.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::codec::{self, ColumnValues, TypedArray};
use crate::container::{column_range, Container};
use crate::format::{data_region_start, ContainerHeader, LENGTH_PREFIX_SIZE};
use crate::payload::{self, PayloadError};

pub use crate::container::parse_header;

/// Errors that can occur during reading
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadError {
    #[error("Base64 decoding failed: {0}")]
    Base64(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Capability unavailable: {0}")]
    Capability(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid header: {0}")]
    Header(String),

    #[error("Unsupported format version: expected {expected}, got {found}")]
    UnsupportedVersion { expected: u32, found: u32 },

    #[error("Container truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Column not found: {category}:{column}")]
    ColumnNotFound { column: String, category: String },

    #[error("Category not found: {0}")]
    CategoryNotFound(String),

    #[error("Unsupported dtype '{dtype}' for column {column}")]
    UnsupportedDtype { column: String, dtype: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<PayloadError> for ReadError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::Base64(e) => ReadError::Base64(e.to_string()),
            PayloadError::Unsupported => ReadError::Capability(err.to_string()),
            PayloadError::Compression(e) | PayloadError::Decompression(e) => {
                ReadError::Decompression(e)
            }
        }
    }
}

/// Base64-decode and gunzip an embedded payload
pub fn decompress(payload: &str) -> Result<Vec<u8>, ReadError> {
    Ok(payload::decode_payload(payload)?)
}

/// Copy one column out of a decompressed container
pub fn extract_column(
    bytes: &[u8],
    header: &ContainerHeader,
    column_name: &str,
    category_key: &str,
) -> Result<TypedArray, ReadError> {
    let descriptor = header
        .find_column(category_key, column_name)
        .ok_or_else(|| ReadError::ColumnNotFound {
            column: column_name.to_string(),
            category: category_key.to_string(),
        })?;
    let data_start = data_start_of(bytes)?;
    copy_column(bytes, data_start, descriptor)
}

/// Copy every column of one category; other categories are not touched
pub fn extract_category(
    bytes: &[u8],
    header: &ContainerHeader,
    category_key: &str,
) -> Result<BTreeMap<String, TypedArray>, ReadError> {
    if !header.has_category(category_key) {
        return Err(ReadError::CategoryNotFound(category_key.to_string()));
    }
    let data_start = data_start_of(bytes)?;
    header
        .columns_in(category_key)
        .map(|d| Ok((d.name.clone(), copy_column(bytes, data_start, d)?)))
        .collect()
}

/// Recompute the data region start from the length prefix, as the writer did
fn data_start_of(bytes: &[u8]) -> Result<usize, ReadError> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes
        .get(..LENGTH_PREFIX_SIZE)
        .and_then(|p| p.try_into().ok())
        .ok_or(ReadError::Truncated {
            needed: LENGTH_PREFIX_SIZE,
            available: bytes.len(),
        })?;
    Ok(data_region_start(u32::from_le_bytes(prefix) as usize))
}

fn copy_column(
    bytes: &[u8],
    data_start: usize,
    descriptor: &crate::format::ColumnDescriptor,
) -> Result<TypedArray, ReadError> {
    let range = column_range(bytes, data_start, descriptor)?;
    let storage = descriptor
        .storage_type()
        .ok_or_else(|| ReadError::UnsupportedDtype {
            column: descriptor.name.clone(),
            dtype: descriptor.dtype.clone(),
        })?;
    TypedArray::from_le_bytes(storage, &bytes[range]).map_err(|e| ReadError::Decode(e.to_string()))
}

/// Reader over one decompressed artifact
#[derive(Debug)]
pub struct ContainerReader {
    container: Container,
}

impl ContainerReader {
    /// Decompress a base64 payload and parse its header
    pub fn from_payload(payload: &str) -> Result<Self, ReadError> {
        let bytes = decompress(payload)?;
        let reader = Self::from_vec(bytes)?;
        info!(
            payload_bytes = payload.len(),
            container_bytes = reader.container.size(),
            columns = reader.header().columns.len(),
            "Payload decompressed"
        );
        Ok(reader)
    }

    /// Create a reader from an already decompressed container
    pub fn from_vec(bytes: Vec<u8>) -> Result<Self, ReadError> {
        Ok(Self {
            container: Container::from_vec(bytes)?,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        self.container.header()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Copy one column into an owned buffer
    pub fn column(&self, column_name: &str, category_key: &str) -> Result<TypedArray, ReadError> {
        let descriptor = self.container.descriptor(category_key, column_name)?;
        debug!(category = %category_key, column = %column_name, "Extracting column");
        copy_column(
            self.container.as_bytes(),
            self.container.data_start(),
            descriptor,
        )
    }

    /// Copy every column of a category into owned buffers
    pub fn category(&self, category_key: &str) -> Result<BTreeMap<String, TypedArray>, ReadError> {
        debug!(category = %category_key, "Extracting category");
        extract_category(self.container.as_bytes(), self.header(), category_key)
    }

    /// Extract and decode a column into logical values
    pub fn decode_column(
        &self,
        column_name: &str,
        category_key: &str,
    ) -> Result<ColumnValues, ReadError> {
        let descriptor = self.container.descriptor(category_key, column_name)?;
        let logical = descriptor.logical().ok_or_else(|| ReadError::UnsupportedDtype {
            column: descriptor.name.clone(),
            dtype: descriptor.dtype.clone(),
        })?;
        let data = self.column(column_name, category_key)?;
        codec::decode(&data, logical, descriptor.categories.as_deref())
            .map_err(|e| ReadError::Decode(e.to_string()))
    }
}
