//! Feature storage: the read/describe/update operations the bearing pass
//! needs, backed by an in-memory table or by KML and GeoJSON files.

mod file;
mod geojson;
mod kml;
mod table;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::StoreError;

pub use file::FileDataset;
pub use table::{Feature, FeatureTable};

/// Display name ESRI-style tools give the WGS-84 geographic system.
pub const WGS84_NAME: &str = "GCS_WGS_1984";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpatialReference {
    pub name: String,
}

impl SpatialReference {
    pub fn wgs84() -> Self {
        Self::named(WGS84_NAME)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn is_wgs84(&self) -> bool {
        self.name == WGS84_NAME
    }
}

impl fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Float,
    Double,
    Integer,
    Text,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Integer => "int",
            FieldType::Text => "string",
        }
    }
}

impl FromStr for FieldType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float" => Ok(FieldType::Float),
            "double" => Ok(FieldType::Double),
            "int" | "uint" | "short" | "ushort" | "integer" => Ok(FieldType::Integer),
            "string" | "text" | "bool" => Ok(FieldType::Text),
            _ => Err(StoreError::new(format!("unknown field type '{s}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Interprets stored text the way KML `<value>` content is read.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            Value::Null
        } else if let Ok(n) = text.parse::<f64>() {
            Value::Number(n)
        } else {
            Value::Text(text.to_string())
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// One record as seen through a cursor: its representative XY and the values
/// of the fields the cursor was opened with, in the same order.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub xy: Option<geo::Point>,
    pub values: Vec<Value>,
}

pub trait FeatureDataset {
    fn name(&self) -> &str;

    fn spatial_reference(&self) -> Result<SpatialReference, StoreError>;

    fn field_names(&self) -> Result<Vec<String>, StoreError>;

    fn add_field(&mut self, name: &str, field_type: FieldType) -> Result<(), StoreError>;

    /// Representative XY of every feature: a point as stored, the centroid
    /// of anything else, `None` when there is no usable geometry.
    fn shapes(&self) -> Result<Vec<Option<geo::Point>>, StoreError>;

    fn row_count(&self) -> usize;

    fn read_row(&self, index: usize, fields: &[String]) -> Result<Row, StoreError>;

    fn write_row(&mut self, index: usize, fields: &[String], row: &Row) -> Result<(), StoreError>;

    fn flush(&mut self) -> Result<(), StoreError>;
}

/// Forward-only cursor holding the dataset's mutable borrow.
pub struct UpdateCursor<'a> {
    dataset: &'a mut dyn FeatureDataset,
    fields: Vec<String>,
    next: usize,
    current: Option<usize>,
}

impl<'a> UpdateCursor<'a> {
    pub fn new(dataset: &'a mut dyn FeatureDataset, fields: &[&str]) -> Result<Self, StoreError> {
        let existing = dataset.field_names()?;
        for field in fields {
            if !existing.iter().any(|f| f == field) {
                return Err(StoreError::new(format!(
                    "cannot find field '{field}' in '{}'",
                    dataset.name()
                )));
            }
        }
        Ok(Self {
            dataset,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            next: 0,
            current: None,
        })
    }

    pub fn next_row(&mut self) -> Result<Option<Row>, StoreError> {
        if self.next >= self.dataset.row_count() {
            self.current = None;
            return Ok(None);
        }
        let row = self.dataset.read_row(self.next, &self.fields)?;
        self.current = Some(self.next);
        self.next += 1;
        Ok(Some(row))
    }

    /// Writes `row` back over the record last returned by [`next_row`](Self::next_row).
    pub fn update_row(&mut self, row: &Row) -> Result<(), StoreError> {
        let Some(index) = self.current else {
            return Err(StoreError::new("update_row called without a current row"));
        };
        self.dataset.write_row(index, &self.fields, row)
    }
}

impl Drop for UpdateCursor<'_> {
    fn drop(&mut self) {
        tracing::trace!(
            "released update cursor on '{}' after {} row(s)",
            self.dataset.name(),
            self.next
        );
    }
}

pub fn open(path: &Path) -> Result<FileDataset, StoreError> {
    FileDataset::open(path)
}

pub fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
