//! Catalog configuration.

use tarn_core::{ContentKey, Error, ObjectIo, Result};

/// Configuration of the catalog pipeline.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// The warehouse root URI; every table and view location must live
    /// under it.
    pub warehouse: String,
}

impl CatalogConfig {
    /// Creates a configuration for the given warehouse root.
    #[must_use]
    pub fn new(warehouse: impl Into<String>) -> Self {
        let mut warehouse = warehouse.into();
        while warehouse.ends_with('/') {
            warehouse.pop();
        }
        Self { warehouse }
    }

    /// The default location assigned to a new entity at `key`.
    #[must_use]
    pub fn default_location(&self, key: &ContentKey) -> String {
        format!("{}/{}", self.warehouse, key.elements().join("/"))
    }

    /// Validates that `uri` is well-formed and inside the warehouse.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed URI or one that does not
    /// relativize under the warehouse root.
    pub fn validate_location(&self, object_io: &dyn ObjectIo, uri: &str) -> Result<()> {
        if !object_io.is_valid_uri(uri) {
            return Err(Error::invalid_argument(format!(
                "unsupported table or view location: {uri}"
            )));
        }
        let root = format!("{}/", self.warehouse);
        if uri != self.warehouse && !uri.starts_with(&root) {
            return Err(Error::invalid_argument(format!(
                "invalid table or view location: {uri} is outside the warehouse {}",
                self.warehouse
            )));
        }
        Ok(())
    }
}
