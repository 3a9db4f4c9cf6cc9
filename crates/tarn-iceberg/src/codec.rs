//! The Iceberg JSON codec boundary.
//!
//! The catalog pipeline serializes drafts into metadata files and parses
//! them back exclusively through [`IcebergCodec`]; nothing outside this
//! crate touches the Iceberg JSON shape. Codec failures are `Internal`
//! errors: a metadata file the catalog itself wrote must always parse.

use bytes::Bytes;

use tarn_core::{Error, Result};

use crate::metadata::{TableMetadata, ViewMetadata};

/// Serializes and deserializes Iceberg metadata JSON.
pub trait IcebergCodec: Send + Sync + 'static {
    /// Serializes table metadata to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when serialization fails.
    fn table_to_json(&self, metadata: &TableMetadata) -> Result<Bytes>;

    /// Parses table metadata from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when the bytes do not parse.
    fn table_from_json(&self, bytes: &[u8]) -> Result<TableMetadata>;

    /// Serializes view metadata to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when serialization fails.
    fn view_to_json(&self, metadata: &ViewMetadata) -> Result<Bytes>;

    /// Parses view metadata from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when the bytes do not parse.
    fn view_from_json(&self, bytes: &[u8]) -> Result<ViewMetadata>;
}

/// The standard serde-based codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonIcebergCodec;

impl JsonIcebergCodec {
    /// Creates the codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl IcebergCodec for JsonIcebergCodec {
    fn table_to_json(&self, metadata: &TableMetadata) -> Result<Bytes> {
        serde_json::to_vec_pretty(metadata)
            .map(Bytes::from)
            .map_err(|e| Error::internal(format!("failed to serialize table metadata: {e}")))
    }

    fn table_from_json(&self, bytes: &[u8]) -> Result<TableMetadata> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::internal(format!("failed to parse table metadata: {e}")))
    }

    fn view_to_json(&self, metadata: &ViewMetadata) -> Result<Bytes> {
        serde_json::to_vec_pretty(metadata)
            .map(Bytes::from)
            .map_err(|e| Error::internal(format!("failed to serialize view metadata: {e}")))
    }

    fn view_from_json(&self, bytes: &[u8]) -> Result<ViewMetadata> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::internal(format!("failed to parse view metadata: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Schema, SchemaField};

    #[test]
    fn table_roundtrip_is_identity() {
        let mut metadata = TableMetadata::empty();
        metadata.location = "s3://wh/db/t".to_string();
        metadata.schemas.push(Schema {
            schema_id: 0,
            schema_type: "struct".to_string(),
            fields: vec![SchemaField {
                id: 1,
                name: "id".to_string(),
                required: true,
                field_type: serde_json::Value::String("long".to_string()),
            }],
        });
        metadata.last_column_id = 1;

        let codec = JsonIcebergCodec::new();
        let bytes = codec.table_to_json(&metadata).unwrap();
        let back = codec.table_from_json(&bytes).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn view_roundtrip_is_identity() {
        let mut metadata = ViewMetadata::empty();
        metadata.location = "s3://wh/db/v".to_string();

        let codec = JsonIcebergCodec::new();
        let bytes = codec.view_to_json(&metadata).unwrap();
        let back = codec.view_from_json(&bytes).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn garbage_bytes_surface_internal() {
        let codec = JsonIcebergCodec::new();
        let err = codec.table_from_json(b"not json").unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }
}
