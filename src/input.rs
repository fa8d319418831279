// SPDX-License-Identifier: MIT
//! Producer-facing input documents
//!
//! The dataset document maps category keys to their columns; the structure
//! document carries display metadata and fixes the category order.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::format::CategoryMeta;

/// `{ [categoryKey]: { columns: [...] } }`
pub type DatasetInput = BTreeMap<String, CategoryInput>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryInput {
    #[serde(default)]
    pub columns: Vec<ColumnInput>,
}

/// A logical column as the producer hands it over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInput {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,

    /// Kept as a raw value so a non-array `data` can be skipped instead of
    /// failing the whole document
    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

impl ColumnInput {
    pub fn new(name: impl Into<String>, dtype: Option<&str>, data: Value) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.map(str::to_string),
            data,
            categories: None,
        }
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = Some(categories);
        self
    }
}

/// `{ categories: [ {key, name, additionalAxes, defaultFilters, ...} ] }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureDocument {
    #[serde(default)]
    pub categories: Vec<CategoryStructure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStructure {
    pub key: String,

    #[serde(flatten)]
    pub meta: CategoryMeta,
}

impl StructureDocument {
    pub fn from_json_file(path: &Path) -> Result<Self, std::io::Error> {
        read_json(path)
    }
}

/// Parse a dataset document from disk
pub fn read_dataset(path: &Path) -> Result<DatasetInput, std::io::Error> {
    read_json(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, std::io::Error> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dataset_parses_non_array_data() {
        let dataset: DatasetInput = serde_json::from_value(json!({
            "cells": {"columns": [
                {"name": "x", "dtype": "numeric", "data": [1.0, 2.0]},
                {"name": "broken", "data": {"not": "an array"}}
            ]}
        }))
        .unwrap();
        let columns = &dataset["cells"].columns;
        assert_eq!(columns.len(), 2);
        assert!(columns[0].data.is_array());
        assert!(!columns[1].data.is_array());
        assert_eq!(columns[1].dtype, None);
    }

    #[test]
    fn test_structure_flattens_meta() {
        let structure: StructureDocument = serde_json::from_value(json!({
            "categories": [
                {"key": "cells", "name": "Cells", "additionalAxes": false, "defaultFilters": ["leiden"]}
            ]
        }))
        .unwrap();
        let entry = &structure.categories[0];
        assert_eq!(entry.key, "cells");
        assert_eq!(entry.meta.name, "Cells");
        assert_eq!(entry.meta.filter_columns(), vec!["leiden"]);
        assert!(entry.meta.extra.is_empty());
    }
}
