// SPDX-License-Identifier: MIT
//! Columnar container format
//!
//! Defines the header schema and the layout arithmetic shared by the packer
//! and the reader. Both sides must compute the data region start the same
//! way, so that logic lives here and nowhere else.
//!
//! ```text
//! offset 0,   4 bytes : u32 little-endian = byte length of header JSON (N)
//! offset 4,   N bytes : UTF-8 JSON header
//! offset 4+N, P bytes : zero padding, P = (4 - (4+N) mod 4) mod 4
//! offset 4+N+P ..     : column buffers, concatenated in header.columns order
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Container format version
pub const FORMAT_VERSION: u32 = 1;

/// Size of the header length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Alignment of the data region start
pub const DATA_ALIGNMENT: usize = 4;

/// Number of zero bytes inserted after a header of `header_len` bytes.
#[inline]
pub fn padding_for(header_len: usize) -> usize {
    (DATA_ALIGNMENT - (LENGTH_PREFIX_SIZE + header_len) % DATA_ALIGNMENT) % DATA_ALIGNMENT
}

/// Absolute offset of the data region for a header of `header_len` bytes.
#[inline]
pub fn data_region_start(header_len: usize) -> usize {
    LENGTH_PREFIX_SIZE + header_len + padding_for(header_len)
}

/// Storage tag written into each column descriptor.
///
/// This is the normative `dtype` of the wire format. Every variant is four
/// bytes wide, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Int32,
    Float32,
    Categorical,
}

impl StorageType {
    /// Width of a single element in bytes
    #[inline]
    pub fn element_width(&self) -> usize {
        4
    }

    /// Tag as written in the header
    pub fn tag(&self) -> &'static str {
        match self {
            StorageType::Int32 => "int32",
            StorageType::Float32 => "float32",
            StorageType::Categorical => "categorical",
        }
    }

    /// Parse a header tag. Unknown tags are not guessed at.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "int32" => Some(StorageType::Int32),
            "float32" => Some(StorageType::Float32),
            "categorical" => Some(StorageType::Categorical),
            _ => None,
        }
    }

    /// Logical type a reader assumes when the descriptor carries none.
    pub fn default_logical(&self) -> LogicalType {
        match self {
            StorageType::Int32 => LogicalType::Integer,
            StorageType::Float32 => LogicalType::Numeric,
            StorageType::Categorical => LogicalType::Categorical,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Semantic type of a column as seen by the producer and the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    Categorical,
    Integer,
    Numeric,
    Boolean,
}

impl LogicalType {
    /// Storage representation of this logical type
    pub fn storage(&self) -> StorageType {
        match self {
            LogicalType::Categorical => StorageType::Categorical,
            LogicalType::Integer | LogicalType::Boolean => StorageType::Int32,
            LogicalType::Numeric => StorageType::Float32,
        }
    }

    /// Parse a producer-declared dtype, accepting the storage spellings as aliases.
    pub fn parse(declared: &str) -> Option<Self> {
        match declared {
            "categorical" => Some(LogicalType::Categorical),
            "integer" | "int" | "int32" => Some(LogicalType::Integer),
            "numeric" | "float" | "float32" => Some(LogicalType::Numeric),
            "boolean" | "bool" => Some(LogicalType::Boolean),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LogicalType::Categorical => "categorical",
            LogicalType::Integer => "integer",
            LogicalType::Numeric => "numeric",
            LogicalType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Display metadata for one category. Opaque to the pipeline; unknown keys
/// are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub additional_axes: bool,

    #[serde(default)]
    pub default_filters: Vec<serde_json::Value>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CategoryMeta {
    /// Metadata for a category that has no structure entry
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Column names referenced by `defaultFilters`, either as plain strings
    /// or as objects carrying a `column` or `name` field.
    pub fn filter_columns(&self) -> Vec<&str> {
        self.default_filters
            .iter()
            .filter_map(|filter| match filter {
                serde_json::Value::String(name) => Some(name.as_str()),
                serde_json::Value::Object(map) => map
                    .get("column")
                    .or_else(|| map.get("name"))
                    .and_then(|v| v.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Location and type of one column inside the data region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub category_key: String,

    /// Storage tag, kept as text so an unknown tag is reported per column
    pub dtype: String,

    /// Byte offset relative to the start of the data region
    pub offset: u64,

    /// Element count
    pub length: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_type: Option<LogicalType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

impl ColumnDescriptor {
    /// Parsed storage tag, `None` for tags this reader does not support
    pub fn storage_type(&self) -> Option<StorageType> {
        StorageType::from_tag(&self.dtype)
    }

    /// Logical type, falling back to the storage tag's default
    pub fn logical(&self) -> Option<LogicalType> {
        self.logical_type
            .or_else(|| self.storage_type().map(|s| s.default_logical()))
    }

    /// Length of the column in bytes, `None` for unsupported tags or overflow
    pub fn byte_len(&self) -> Option<u64> {
        let width = self.storage_type()?.element_width() as u64;
        self.length.checked_mul(width)
    }

    /// Byte range relative to the data region start
    pub fn relative_range(&self) -> Option<Range<u64>> {
        let end = self.offset.checked_add(self.byte_len()?)?;
        Some(self.offset..end)
    }

    /// Absolute byte range inside a container whose data region starts at `data_start`
    pub fn absolute_range(&self, data_start: usize) -> Option<Range<usize>> {
        let relative = self.relative_range()?;
        let start = usize::try_from(relative.start).ok()?.checked_add(data_start)?;
        let end = usize::try_from(relative.end).ok()?.checked_add(data_start)?;
        Some(start..end)
    }
}

/// Schema of one packed artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub version: u32,

    #[serde(default)]
    pub categories: BTreeMap<String, CategoryMeta>,

    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
}

impl ContainerHeader {
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            categories: BTreeMap::new(),
            columns: Vec::new(),
        }
    }

    /// Exact name + category lookup
    pub fn find_column(&self, category_key: &str, column_name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.category_key == category_key && c.name == column_name)
    }

    /// Every descriptor belonging to `category_key`, in header order
    pub fn columns_in<'a>(
        &'a self,
        category_key: &'a str,
    ) -> impl Iterator<Item = &'a ColumnDescriptor> + 'a {
        self.columns
            .iter()
            .filter(move |c| c.category_key == category_key)
    }

    /// A category is known if it has metadata or at least one column
    pub fn has_category(&self, category_key: &str) -> bool {
        self.categories.contains_key(category_key)
            || self.columns.iter().any(|c| c.category_key == category_key)
    }

    /// Row count of a category, taken from its first column
    pub fn num_rows(&self, category_key: &str) -> Option<u64> {
        self.columns_in(category_key).next().map(|c| c.length)
    }

    /// Total size of the data region implied by the descriptors
    pub fn data_len(&self) -> u64 {
        self.columns
            .iter()
            .filter_map(|c| c.relative_range())
            .map(|r| r.end)
            .max()
            .unwrap_or(0)
    }
}

impl Default for ContainerHeader {
    fn default() -> Self {
        Self::new()
    }
}
