// SPDX-License-Identifier: MIT
//! Container writer: packs a multi-category dataset into one artifact

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::codec::{self, EncodedColumn};
use crate::format::{
    data_region_start, padding_for, CategoryMeta, ColumnDescriptor, ContainerHeader,
    LogicalType, LENGTH_PREFIX_SIZE,
};
use crate::input::{CategoryInput, ColumnInput, DatasetInput, StructureDocument};
use crate::payload::{self, PayloadError, DEFAULT_GZIP_LEVEL};

/// Errors that abort packing
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Structure references category '{0}' but the dataset has no data for it")]
    MissingCategoryData(String),

    #[error("Header serialization failed: {0}")]
    Header(#[from] serde_json::Error),

    #[error("Header too large: {0} bytes")]
    HeaderTooLarge(usize),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Why a column was left out of the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    DataNotArray,
    UnknownDtype(String),
    Encoding(String),
    DuplicateName,
    LengthMismatch { expected: usize, found: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedColumn {
    pub category_key: String,
    pub column_name: String,
    pub reason: SkipReason,
}

/// Non-fatal problems found while packing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackReport {
    pub skipped_columns: Vec<SkippedColumn>,
    pub skipped_categories: Vec<String>,
}

impl PackReport {
    pub fn is_clean(&self) -> bool {
        self.skipped_columns.is_empty() && self.skipped_categories.is_empty()
    }
}

/// An uncompressed container plus the header it was built from
#[derive(Debug, Clone)]
pub struct PackedContainer {
    pub header: ContainerHeader,
    pub bytes: Vec<u8>,
    pub report: PackReport,
    header_len: usize,
}

impl PackedContainer {
    /// Byte length of the serialized header JSON, as recorded when packing
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Absolute offset of the data region
    pub fn data_start(&self) -> usize {
        data_region_start(self.header_len())
    }

    /// Gzip + base64 the container
    pub fn to_payload(&self, gzip_level: u32) -> Result<String, WriteError> {
        Ok(payload::encode_payload(&self.bytes, gzip_level)?)
    }
}

/// Builder for columnar containers
#[derive(Debug, Clone)]
pub struct ContainerWriter {
    structure: Option<StructureDocument>,
    gzip_level: u32,
}

impl ContainerWriter {
    pub fn new() -> Self {
        Self {
            structure: None,
            gzip_level: DEFAULT_GZIP_LEVEL,
        }
    }

    /// Use a structure document for category order and display metadata
    pub fn with_structure(mut self, structure: StructureDocument) -> Self {
        self.structure = Some(structure);
        self
    }

    pub fn with_gzip_level(mut self, level: u32) -> Self {
        self.gzip_level = level.min(9);
        self
    }

    pub fn gzip_level(&self) -> u32 {
        self.gzip_level
    }

    /// Pack the dataset and encode it as an embeddable payload
    pub fn write_payload(&self, dataset: &DatasetInput) -> Result<(String, PackReport), WriteError> {
        let packed = self.pack(dataset)?;
        let payload = packed.to_payload(self.gzip_level)?;
        info!(
            container_bytes = packed.bytes.len(),
            payload_bytes = payload.len(),
            "Payload encoded"
        );
        Ok((payload, packed.report))
    }

    /// Build the uncompressed container
    pub fn pack(&self, dataset: &DatasetInput) -> Result<PackedContainer, WriteError> {
        let mut header = ContainerHeader::new();
        let mut report = PackReport::default();
        let mut buffers: Vec<EncodedColumn> = Vec::new();
        let mut offset: u64 = 0;

        for (key, meta, category) in self.ordered_categories(dataset, &mut report)? {
            header.categories.insert(key.to_string(), meta);

            for (column, encoded) in encode_category(key, category, &mut report) {
                let length = encoded.data.len() as u64;
                header.columns.push(ColumnDescriptor {
                    name: column.name.clone(),
                    category_key: key.to_string(),
                    dtype: encoded.storage_type().tag().to_string(),
                    offset,
                    length,
                    logical_type: Some(encoded.logical_type),
                    categories: encoded.categories.clone(),
                });
                offset += encoded.data.byte_len() as u64;
                buffers.push(encoded);
            }
        }

        let header_bytes = serde_json::to_vec(&header)?;
        let header_len = u32::try_from(header_bytes.len())
            .map_err(|_| WriteError::HeaderTooLarge(header_bytes.len()))?;
        let padding = padding_for(header_bytes.len());
        let total_size = LENGTH_PREFIX_SIZE + header_bytes.len() + padding + offset as usize;

        // Pre-allocate exact size to avoid any reallocations
        let mut bytes = Vec::with_capacity(total_size);
        bytes.extend_from_slice(&header_len.to_le_bytes());
        bytes.extend_from_slice(&header_bytes);
        bytes.resize(bytes.len() + padding, 0);
        for encoded in &buffers {
            encoded.data.write_le(&mut bytes);
        }

        debug_assert_eq!(bytes.len(), total_size);
        info!(
            categories = header.categories.len(),
            columns = header.columns.len(),
            header_bytes = header_bytes.len(),
            data_bytes = offset,
            skipped = report.skipped_columns.len(),
            "Container packed"
        );

        Ok(PackedContainer {
            header,
            bytes,
            report,
            header_len: header_bytes.len(),
        })
    }

    /// Categories in output order, paired with their display metadata
    fn ordered_categories<'a>(
        &'a self,
        dataset: &'a DatasetInput,
        report: &mut PackReport,
    ) -> Result<Vec<(&'a str, CategoryMeta, &'a CategoryInput)>, WriteError> {
        let Some(structure) = &self.structure else {
            return Ok(dataset
                .iter()
                .map(|(key, category)| (key.as_str(), CategoryMeta::named(key.as_str()), category))
                .collect());
        };

        let mut ordered = Vec::with_capacity(structure.categories.len());
        let mut seen = HashSet::new();
        for entry in &structure.categories {
            let category = dataset
                .get(&entry.key)
                .ok_or_else(|| WriteError::MissingCategoryData(entry.key.clone()))?;
            if !seen.insert(entry.key.as_str()) {
                warn!(category = %entry.key, "Category listed twice in structure, keeping first");
                continue;
            }
            let mut meta = entry.meta.clone();
            if meta.name.is_empty() {
                meta.name = entry.key.clone();
            }
            ordered.push((entry.key.as_str(), meta, category));
        }

        for key in dataset.keys().filter(|k| !seen.contains(k.as_str())) {
            warn!(category = %key, "Category has no structure entry, skipping");
            report.skipped_categories.push(key.clone());
        }

        Ok(ordered)
    }
}

impl Default for ContainerWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode every usable column of one category, recording the ones left out
fn encode_category<'a>(
    key: &str,
    category: &'a CategoryInput,
    report: &mut PackReport,
) -> Vec<(&'a ColumnInput, EncodedColumn)> {
    let mut encoded = Vec::with_capacity(category.columns.len());
    let mut names: HashSet<&str> = HashSet::new();
    let mut num_rows: Option<usize> = None;

    for column in &category.columns {
        let mut skip = |reason: SkipReason| {
            warn!(category = %key, column = %column.name, ?reason, "Skipping column");
            report.skipped_columns.push(SkippedColumn {
                category_key: key.to_string(),
                column_name: column.name.clone(),
                reason,
            });
        };

        if names.contains(column.name.as_str()) {
            skip(SkipReason::DuplicateName);
            continue;
        }

        let Some(values) = column.data.as_array() else {
            skip(SkipReason::DataNotArray);
            continue;
        };

        let declared = match column.dtype.as_deref() {
            Some(dtype) => match LogicalType::parse(dtype) {
                Some(logical) => Some(logical),
                None => {
                    skip(SkipReason::UnknownDtype(dtype.to_string()));
                    continue;
                }
            },
            None => None,
        };

        if let Some(expected) = num_rows {
            if values.len() != expected {
                skip(SkipReason::LengthMismatch {
                    expected,
                    found: values.len(),
                });
                continue;
            }
        }

        match codec::encode(values, declared, column.categories.as_deref()) {
            Ok(column_data) => {
                debug!(
                    category = %key,
                    column = %column.name,
                    dtype = %column_data.logical_type,
                    rows = values.len(),
                    "Encoded column"
                );
                num_rows.get_or_insert(values.len());
                names.insert(column.name.as_str());
                encoded.push((column, column_data));
            }
            Err(e) => skip(SkipReason::Encoding(e.to_string())),
        }
    }

    encoded
}
