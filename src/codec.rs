// SPDX-License-Identifier: MIT
//! Column codec: logical values <-> dense typed buffers
//!
//! Missing values are normalized to exactly one sentinel per logical type at
//! this boundary, so nothing downstream has to guess:
//!
//! | logical type | storage | missing |
//! |--------------|---------|---------|
//! | categorical  | `i32`   | `-1`    |
//! | integer      | `i32`   | `i32::MIN` |
//! | boolean      | `i32`   | `-1`    |
//! | numeric      | `f32`   | `NaN`   |

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::format::{LogicalType, StorageType};

/// Missing categorical index
pub const MISSING_CATEGORY: i32 = -1;

/// Missing integer value
pub const MISSING_INTEGER: i32 = i32::MIN;

/// Missing boolean value
pub const MISSING_BOOLEAN: i32 = -1;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("Category index {index} out of range for {count} categories")]
    CategoryIndexOutOfRange { index: i64, count: usize },

    #[error("Buffer holds {found} data but {expected} was expected")]
    StorageMismatch {
        expected: StorageType,
        found: &'static str,
    },

    #[error("Buffer length {0} is not a multiple of the element width")]
    UnalignedBuffer(usize),
}

/// Owned, fixed-width column buffer
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
    Int32(Vec<i32>),
    Float32(Vec<f32>),
}

impl TypedArray {
    pub fn len(&self) -> usize {
        match self {
            TypedArray::Int32(v) => v.len(),
            TypedArray::Float32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * 4
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TypedArray::Int32(_) => "int32",
            TypedArray::Float32(_) => "float32",
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            TypedArray::Int32(v) => Some(v),
            TypedArray::Float32(_) => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TypedArray::Float32(v) => Some(v),
            TypedArray::Int32(_) => None,
        }
    }

    /// Append the little-endian bytes of every element to `out`
    pub fn write_le(&self, out: &mut Vec<u8>) {
        out.reserve(self.byte_len());
        match self {
            TypedArray::Int32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            TypedArray::Float32(v) => {
                v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes()))
            }
        }
    }

    /// Copy little-endian bytes into a freshly allocated typed buffer
    pub fn from_le_bytes(storage: StorageType, bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() % storage.element_width() != 0 {
            return Err(CodecError::UnalignedBuffer(bytes.len()));
        }
        let chunks = bytes.chunks_exact(4);
        Ok(match storage {
            StorageType::Int32 | StorageType::Categorical => TypedArray::Int32(
                chunks
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            StorageType::Float32 => TypedArray::Float32(
                chunks
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
        })
    }
}

/// Result of encoding one logical column
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedColumn {
    pub logical_type: LogicalType,
    pub data: TypedArray,
    pub categories: Option<Vec<String>>,
}

impl EncodedColumn {
    pub fn storage_type(&self) -> StorageType {
        self.logical_type.storage()
    }
}

/// Decoded logical values, `None` where the sentinel was stored
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Categorical(Vec<Option<String>>),
    Integer(Vec<Option<i32>>),
    Numeric(Vec<Option<f32>>),
    Boolean(Vec<Option<bool>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Categorical(v) => v.len(),
            ColumnValues::Integer(v) => v.len(),
            ColumnValues::Numeric(v) => v.len(),
            ColumnValues::Boolean(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First `limit` values rendered as a list, missing values as `null`
    pub fn preview(&self, limit: usize) -> String {
        fn render<T: std::fmt::Display>(values: &[Option<T>], limit: usize) -> Vec<String> {
            values
                .iter()
                .take(limit)
                .map(|v| v.as_ref().map_or_else(|| "null".to_string(), |v| v.to_string()))
                .collect()
        }

        let items = match self {
            ColumnValues::Categorical(v) => render(v, limit),
            ColumnValues::Integer(v) => render(v, limit),
            ColumnValues::Numeric(v) => render(v, limit),
            ColumnValues::Boolean(v) => render(v, limit),
        };
        let more = if self.len() > limit { ", ..." } else { "" };
        format!("[{}{}]", items.join(", "), more)
    }
}

/// Infer a logical type from the first non-null sample.
///
/// Mixed-type columns are resolved by whichever type the first non-null value
/// has; all-null and empty columns are numeric.
pub fn infer_type(values: &[Value]) -> LogicalType {
    match values.iter().find(|v| !v.is_null()) {
        Some(Value::Bool(_)) => LogicalType::Boolean,
        Some(Value::String(_)) => LogicalType::Categorical,
        Some(Value::Number(n)) if is_integral(n) => LogicalType::Integer,
        _ => LogicalType::Numeric,
    }
}

fn is_integral(n: &serde_json::Number) -> bool {
    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
}

/// Encode values with a declared type, or the inferred one when `declared` is `None`.
///
/// `categories`, when given for a categorical column, seeds the label list in
/// its given order; integer values are then taken as pre-encoded indices.
pub fn encode(
    values: &[Value],
    declared: Option<LogicalType>,
    categories: Option<&[String]>,
) -> Result<EncodedColumn, CodecError> {
    let logical_type = declared.unwrap_or_else(|| infer_type(values));
    let (data, categories) = match logical_type {
        LogicalType::Categorical => {
            let (indices, labels) = encode_categorical(values, categories)?;
            (TypedArray::Int32(indices), Some(labels))
        }
        LogicalType::Integer => (
            TypedArray::Int32(values.iter().map(encode_integer).collect()),
            None,
        ),
        LogicalType::Boolean => (
            TypedArray::Int32(values.iter().map(encode_boolean).collect()),
            None,
        ),
        LogicalType::Numeric => (
            TypedArray::Float32(values.iter().map(encode_numeric).collect()),
            None,
        ),
    };

    Ok(EncodedColumn {
        logical_type,
        data,
        categories,
    })
}

fn encode_categorical(
    values: &[Value],
    seed: Option<&[String]>,
) -> Result<(Vec<i32>, Vec<String>), CodecError> {
    let mut labels: Vec<String> = Vec::new();
    let mut lookup: HashMap<String, i32> = HashMap::new();
    let seeded = seed.is_some();

    // Seeded labels keep their order; repeats collapse onto the first occurrence
    for label in seed.unwrap_or_default() {
        if !lookup.contains_key(label) {
            lookup.insert(label.clone(), labels.len() as i32);
            labels.push(label.clone());
        }
    }

    // First pass: distinct labels in first-seen order
    for value in values {
        if let Some(label) = category_label(value, seeded) {
            if !lookup.contains_key(&label) {
                lookup.insert(label.clone(), labels.len() as i32);
                labels.push(label);
            }
        }
    }

    // Second pass: map every value to its index
    let mut indices = Vec::with_capacity(values.len());
    for value in values {
        let index = match value {
            Value::Null => MISSING_CATEGORY,
            Value::Number(n) if seeded && n.is_i64() => {
                let index = n.as_i64().unwrap_or_default();
                if index < 0 || index as usize >= labels.len() {
                    return Err(CodecError::CategoryIndexOutOfRange {
                        index,
                        count: labels.len(),
                    });
                }
                index as i32
            }
            other => category_label(other, seeded)
                .and_then(|label| lookup.get(&label).copied())
                .unwrap_or(MISSING_CATEGORY),
        };
        indices.push(index);
    }

    Ok((indices, labels))
}

/// Label for a categorical value; pre-encoded integer indices have no label.
fn category_label(value: &Value, seeded: bool) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if seeded && n.is_i64() => None,
        other => Some(other.to_string()),
    }
}

fn encode_integer(value: &Value) -> i32 {
    match value {
        Value::Null => MISSING_INTEGER,
        Value::Bool(b) => i32::from(*b),
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.clamp(MISSING_INTEGER as i64 + 1, i32::MAX as i64) as i32)
            .or_else(|| n.as_f64().map(saturate_f64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<f64>().map(saturate_f64).unwrap_or(0),
        _ => 0,
    }
}

/// Truncating cast that never produces the missing sentinel
fn saturate_f64(f: f64) -> i32 {
    (f as i32).max(MISSING_INTEGER + 1)
}

fn encode_boolean(value: &Value) -> i32 {
    match value {
        Value::Null => MISSING_BOOLEAN,
        Value::Bool(b) => i32::from(*b),
        Value::Number(n) => i32::from(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => i32::from(matches!(s.trim(), "true" | "True" | "TRUE" | "1")),
        _ => 0,
    }
}

fn encode_numeric(value: &Value) -> f32 {
    match value {
        Value::Null => f32::NAN,
        Value::Number(n) => n.as_f64().map(|f| f as f32).unwrap_or(0.0),
        Value::Bool(b) => f32::from(u8::from(*b)),
        Value::String(s) => s.trim().parse::<f32>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Decode a typed buffer back into logical values
pub fn decode(
    data: &TypedArray,
    logical_type: LogicalType,
    categories: Option<&[String]>,
) -> Result<ColumnValues, CodecError> {
    match (logical_type, data) {
        (LogicalType::Categorical, TypedArray::Int32(indices)) => {
            let labels = categories.unwrap_or(&[]);
            let values = indices
                .iter()
                .map(|&index| match index {
                    MISSING_CATEGORY => Ok(None),
                    i if i >= 0 && (i as usize) < labels.len() => {
                        Ok(Some(labels[i as usize].clone()))
                    }
                    i => Err(CodecError::CategoryIndexOutOfRange {
                        index: i as i64,
                        count: labels.len(),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ColumnValues::Categorical(values))
        }
        (LogicalType::Integer, TypedArray::Int32(values)) => Ok(ColumnValues::Integer(
            values
                .iter()
                .map(|&v| (v != MISSING_INTEGER).then_some(v))
                .collect(),
        )),
        (LogicalType::Boolean, TypedArray::Int32(values)) => Ok(ColumnValues::Boolean(
            values
                .iter()
                .map(|&v| (v != MISSING_BOOLEAN).then_some(v != 0))
                .collect(),
        )),
        (LogicalType::Numeric, TypedArray::Float32(values)) => Ok(ColumnValues::Numeric(
            values.iter().map(|&v| (!v.is_nan()).then_some(v)).collect(),
        )),
        (logical, other) => Err(CodecError::StorageMismatch {
            expected: logical.storage(),
            found: other.kind(),
        }),
    }
}
