//! Dataset descriptors advertised by a catalog

use std::fmt;

use arrow::datatypes::SchemaRef;
use bytes::Bytes;

/// How a dataset is addressed on the server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatasetLocator {
    /// Named dataset, e.g. `["sales", "2024"]`
    Path(Vec<String>),
    /// Opaque command understood by the server
    Command(Bytes),
}

impl DatasetLocator {
    pub fn identifier(&self) -> String {
        match self {
            DatasetLocator::Path(segments) => segments.join("/"),
            DatasetLocator::Command(cmd) => String::from_utf8_lossy(cmd).into_owned(),
        }
    }
}

/// One dataset from a catalog listing.
///
/// Descriptors are read-only snapshots of what the server reported; the
/// metadata fields are `None` when the server left them unset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetDescriptor {
    locator: DatasetLocator,
    schema: Option<SchemaRef>,
    total_records: Option<u64>,
    total_bytes: Option<u64>,
    ordered: bool,
    locations: Vec<String>,
    app_metadata: Bytes,
}

impl DatasetDescriptor {
    pub fn new(locator: DatasetLocator) -> Self {
        Self {
            locator,
            schema: None,
            total_records: None,
            total_bytes: None,
            ordered: false,
            locations: Vec::new(),
            app_metadata: Bytes::new(),
        }
    }

    /// Descriptor for a path-addressed dataset
    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(DatasetLocator::Path(
            segments.into_iter().map(Into::into).collect(),
        ))
    }

    /// Descriptor for a command-addressed dataset
    pub fn command(cmd: impl Into<Bytes>) -> Self {
        Self::new(DatasetLocator::Command(cmd.into()))
    }

    pub fn with_schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_total_records(mut self, total_records: Option<u64>) -> Self {
        self.total_records = total_records;
        self
    }

    pub fn with_total_bytes(mut self, total_bytes: Option<u64>) -> Self {
        self.total_bytes = total_bytes;
        self
    }

    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn with_locations(mut self, locations: Vec<String>) -> Self {
        self.locations = locations;
        self
    }

    pub fn with_app_metadata(mut self, app_metadata: impl Into<Bytes>) -> Self {
        self.app_metadata = app_metadata.into();
        self
    }

    pub fn locator(&self) -> &DatasetLocator {
        &self.locator
    }

    /// Printable name of the dataset
    pub fn identifier(&self) -> String {
        self.locator.identifier()
    }

    pub fn schema(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    pub fn total_records(&self) -> Option<u64> {
        self.total_records
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    pub fn ordered(&self) -> bool {
        self.ordered
    }

    /// URIs of the locations serving this dataset
    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    pub fn app_metadata(&self) -> &Bytes {
        &self.app_metadata
    }
}

impl fmt::Display for DatasetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    #[test]
    fn test_path_identifier() {
        let descriptor = DatasetDescriptor::path(["sales", "2024"]);
        assert_eq!(descriptor.identifier(), "sales/2024");
        assert_eq!(descriptor.to_string(), "sales/2024");
        assert!(descriptor.schema().is_none());
        assert!(descriptor.total_records().is_none());
    }

    #[test]
    fn test_command_identifier() {
        let descriptor = DatasetDescriptor::command("SELECT * FROM trips");
        assert_eq!(descriptor.identifier(), "SELECT * FROM trips");
        assert!(matches!(descriptor.locator(), DatasetLocator::Command(_)));
    }

    #[test]
    fn test_metadata_builders() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let descriptor = DatasetDescriptor::path(["trips"])
            .with_schema(schema.clone())
            .with_total_records(Some(42))
            .with_total_bytes(Some(1024))
            .with_ordered(true)
            .with_locations(vec!["grpc+tcp://node-1:8815".to_string()]);

        assert_eq!(descriptor.schema(), Some(&schema));
        assert_eq!(descriptor.total_records(), Some(42));
        assert_eq!(descriptor.total_bytes(), Some(1024));
        assert!(descriptor.ordered());
        assert_eq!(descriptor.locations(), ["grpc+tcp://node-1:8815"]);
        assert!(descriptor.app_metadata().is_empty());
    }
}
