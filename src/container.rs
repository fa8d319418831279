// SPDX-License-Identifier: MIT
//! Decompressed container with zero-copy access to column bytes

use std::ops::Range;

use tracing::trace;

use crate::format::{
    data_region_start, ColumnDescriptor, ContainerHeader, FORMAT_VERSION, LENGTH_PREFIX_SIZE,
};
use crate::reader::ReadError;

/// Read the header length prefix and parse the header JSON that follows it.
///
/// Returns the header and its byte length.
pub fn parse_header(bytes: &[u8]) -> Result<(ContainerHeader, usize), ReadError> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes
        .get(..LENGTH_PREFIX_SIZE)
        .and_then(|p| p.try_into().ok())
        .ok_or(ReadError::Truncated {
            needed: LENGTH_PREFIX_SIZE,
            available: bytes.len(),
        })?;
    let header_len = u32::from_le_bytes(prefix) as usize;

    let end = LENGTH_PREFIX_SIZE
        .checked_add(header_len)
        .ok_or_else(|| ReadError::InvalidFormat("header length overflows".to_string()))?;
    let json = bytes.get(LENGTH_PREFIX_SIZE..end).ok_or(ReadError::Truncated {
        needed: end,
        available: bytes.len(),
    })?;

    let text = std::str::from_utf8(json)
        .map_err(|e| ReadError::InvalidFormat(format!("Invalid UTF-8 in header: {}", e)))?;
    let header: ContainerHeader =
        serde_json::from_str(text).map_err(|e| ReadError::Header(e.to_string()))?;

    if header.version != FORMAT_VERSION {
        return Err(ReadError::UnsupportedVersion {
            expected: FORMAT_VERSION,
            found: header.version,
        });
    }

    Ok((header, header_len))
}

/// A parsed container. The buffer is never mutated or handed out after
/// construction; callers get borrowed slices or copies.
#[derive(Debug)]
pub struct Container {
    header: ContainerHeader,
    header_len: usize,
    data: Vec<u8>,
}

impl Container {
    /// Take ownership of a decompressed buffer and parse its header
    pub fn from_vec(data: Vec<u8>) -> Result<Self, ReadError> {
        let (header, header_len) = parse_header(&data)?;
        Ok(Self {
            header,
            header_len,
            data,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Absolute offset where column data begins
    pub fn data_start(&self) -> usize {
        data_region_start(self.header_len)
    }

    /// Total size of the decompressed buffer
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Exact name + category lookup
    pub fn descriptor(&self, category_key: &str, column_name: &str) -> Result<&ColumnDescriptor, ReadError> {
        self.header
            .find_column(category_key, column_name)
            .ok_or_else(|| ReadError::ColumnNotFound {
                column: column_name.to_string(),
                category: category_key.to_string(),
            })
    }

    /// Borrow the bytes of one column (zero-copy)
    pub fn column_bytes(&self, descriptor: &ColumnDescriptor) -> Result<&[u8], ReadError> {
        let range = column_range(&self.data, self.data_start(), descriptor)?;
        Ok(&self.data[range])
    }

    /// Check that every descriptor is supported, lies inside the buffer and
    /// does not overlap any other.
    pub fn validate(&self) -> Result<(), ReadError> {
        let data_start = self.data_start();
        let mut ranges: Vec<(Range<usize>, &ColumnDescriptor)> = self
            .header
            .columns
            .iter()
            .map(|d| column_range(&self.data, data_start, d).map(|r| (r, d)))
            .collect::<Result<_, _>>()?;

        ranges.sort_by_key(|(r, _)| (r.start, r.end));
        for pair in ranges.windows(2) {
            let (first, a) = &pair[0];
            let (second, b) = &pair[1];
            if first.end > second.start {
                return Err(ReadError::InvalidFormat(format!(
                    "Columns {}:{} and {}:{} overlap",
                    a.category_key, a.name, b.category_key, b.name
                )));
            }
        }

        Ok(())
    }
}

/// Absolute byte range of a column, checked against the buffer
pub(crate) fn column_range(
    bytes: &[u8],
    data_start: usize,
    descriptor: &ColumnDescriptor,
) -> Result<Range<usize>, ReadError> {
    if descriptor.storage_type().is_none() {
        return Err(ReadError::UnsupportedDtype {
            column: descriptor.name.clone(),
            dtype: descriptor.dtype.clone(),
        });
    }

    let range = descriptor
        .absolute_range(data_start)
        .ok_or_else(|| ReadError::InvalidFormat(format!("Column {} range overflows", descriptor.name)))?;

    if range.end > bytes.len() {
        return Err(ReadError::Truncated {
            needed: range.end,
            available: bytes.len(),
        });
    }

    trace!(
        category = %descriptor.category_key,
        column = %descriptor.name,
        start = range.start,
        end = range.end,
        "Column byte range"
    );
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ColumnDescriptor;

    /// Build a container by hand so tests do not depend on the writer
    fn raw_container(header: &ContainerHeader, data: &[u8]) -> Vec<u8> {
        let json = serde_json::to_vec(header).unwrap();
        let mut bytes = (json.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(&json);
        bytes.resize(data_region_start(json.len()), 0);
        bytes.extend_from_slice(data);
        bytes
    }

    fn int_column(name: &str, offset: u64, length: u64) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            category_key: "cat".to_string(),
            dtype: "int32".to_string(),
            offset,
            length,
            logical_type: None,
            categories: None,
        }
    }

    #[test]
    fn test_parse_header_too_small() {
        assert!(matches!(
            parse_header(&[1, 0]),
            Err(ReadError::Truncated { needed: 4, available: 2 })
        ));
    }

    #[test]
    fn test_parse_header_truncated_json() {
        let mut bytes = 100u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{\"version\":1}");
        assert!(matches!(parse_header(&bytes), Err(ReadError::Truncated { .. })));
    }

    #[test]
    fn test_parse_header_garbled_json() {
        let mut bytes = 5u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{oops");
        assert!(matches!(parse_header(&bytes), Err(ReadError::Header(_))));
    }

    #[test]
    fn test_parse_header_rejects_unknown_version() {
        let mut header = ContainerHeader::new();
        header.version = 2;
        let bytes = raw_container(&header, &[]);
        assert!(matches!(
            parse_header(&bytes),
            Err(ReadError::UnsupportedVersion { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn test_column_bytes_zero_copy() {
        let mut header = ContainerHeader::new();
        header.columns.push(int_column("a", 0, 1));
        header.columns.push(int_column("b", 4, 1));
        let mut data = 7i32.to_le_bytes().to_vec();
        data.extend_from_slice(&9i32.to_le_bytes());

        let container = Container::from_vec(raw_container(&header, &data)).unwrap();
        let desc = container.descriptor("cat", "b").unwrap();
        assert_eq!(container.column_bytes(desc).unwrap(), &9i32.to_le_bytes());
        assert!(container.validate().is_ok());
        assert!(matches!(
            container.descriptor("cat", "c"),
            Err(ReadError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_validate_detects_overlap_and_truncation() {
        let mut header = ContainerHeader::new();
        header.columns.push(int_column("a", 0, 2));
        header.columns.push(int_column("b", 4, 1));
        let container = Container::from_vec(raw_container(&header, &[0; 8])).unwrap();
        assert!(matches!(container.validate(), Err(ReadError::InvalidFormat(_))));

        let mut header = ContainerHeader::new();
        header.columns.push(int_column("a", 0, 4));
        let container = Container::from_vec(raw_container(&header, &[0; 8])).unwrap();
        assert!(matches!(container.validate(), Err(ReadError::Truncated { .. })));
    }

    #[test]
    fn test_unsupported_dtype_reported() {
        let mut header = ContainerHeader::new();
        let mut column = int_column("s", 0, 1);
        column.dtype = "utf8".to_string();
        header.columns.push(column);
        let container = Container::from_vec(raw_container(&header, &[0; 4])).unwrap();
        let desc = container.descriptor("cat", "s").unwrap();
        assert!(matches!(
            container.column_bytes(desc),
            Err(ReadError::UnsupportedDtype { .. })
        ));
    }
}
