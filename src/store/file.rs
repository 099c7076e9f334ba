use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{base_name, geojson, kml, FeatureDataset, FeatureTable, FieldType, Row, SpatialReference};
use crate::error::StoreError;

pub(super) enum Document {
    Kml(::kml::Kml),
    GeoJson(serde_json::Value),
}

/// Edits stay in memory until `flush` rewrites the file.
pub struct FileDataset {
    path: PathBuf,
    document: Document,
    table: FeatureTable,
}

impl FileDataset {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let name = base_name(path);

        let text = fs::read_to_string(path).map_err(|e| StoreError::io(path, &e))?;
        let (document, table) = match ext.as_str() {
            "kml" => {
                let (kml, table) = kml::load(&name, &text)
                    .map_err(|e| e.with_context(path))?;
                (Document::Kml(kml), table)
            }
            "geojson" | "json" => {
                let (json, table) = geojson::load(&name, &text)
                    .map_err(|e| e.with_context(path))?;
                (Document::GeoJson(json), table)
            }
            _ => {
                return Err(StoreError::new(format!(
                    "unsupported dataset '{}': expected a .kml, .geojson or .json file",
                    path.display()
                )))
            }
        };

        debug!(
            "opened '{}': {} feature(s), spatial reference {}",
            path.display(),
            table.row_count(),
            table.spatial_reference()?
        );

        Ok(Self {
            path: path.to_path_buf(),
            document,
            table,
        })
    }

    fn write_document(&self) -> Result<(), StoreError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = self.path.with_file_name(format!(".{file_name}.tmp"));

        let written = self.write_to(&tmp);
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written
    }

    fn write_to(&self, tmp: &Path) -> Result<(), StoreError> {
        let file = File::create(tmp).map_err(|e| StoreError::io(tmp, &e))?;
        let mut writer = BufWriter::new(file);
        let written = match &self.document {
            Document::Kml(doc) => kml::write(doc, &mut writer),
            Document::GeoJson(doc) => geojson::write(doc, &mut writer),
        };
        written.map_err(|e| e.with_context(&self.path))?;
        writer.flush().map_err(|e| StoreError::io(tmp, &e))?;
        drop(writer);

        fs::rename(tmp, &self.path).map_err(|e| StoreError::io(&self.path, &e))
    }
}

impl FeatureDataset for FileDataset {
    fn name(&self) -> &str {
        self.table.name()
    }

    fn spatial_reference(&self) -> Result<SpatialReference, StoreError> {
        self.table.spatial_reference()
    }

    fn field_names(&self) -> Result<Vec<String>, StoreError> {
        self.table.field_names()
    }

    fn add_field(&mut self, name: &str, field_type: FieldType) -> Result<(), StoreError> {
        self.table.add_field(name, field_type)
    }

    fn shapes(&self) -> Result<Vec<Option<geo::Point>>, StoreError> {
        self.table.shapes()
    }

    fn row_count(&self) -> usize {
        self.table.row_count()
    }

    fn read_row(&self, index: usize, fields: &[String]) -> Result<Row, StoreError> {
        self.table.read_row(index, fields)
    }

    fn write_row(&mut self, index: usize, fields: &[String], row: &Row) -> Result<(), StoreError> {
        self.table.write_row(index, fields, row)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        let dirty = self.table.dirty_fields();
        if dirty.is_empty() {
            return Ok(());
        }
        let applied = match &mut self.document {
            Document::Kml(doc) => kml::apply(doc, &self.table, &dirty),
            Document::GeoJson(doc) => geojson::apply(doc, &self.table, &dirty),
        };
        applied.map_err(|e| e.with_context(&self.path))?;
        self.write_document()?;
        self.table.clear_dirty();
        info!(
            "saved {} field(s) to '{}': {}",
            dirty.len(),
            self.path.display(),
            dirty.join(", ")
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::Value;
    use tempfile::TempDir;

    const FIXES: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {"bird": "WC-7"},
         "geometry": {"type": "Point", "coordinates": [-98.85, 40.68]}}
    ]}"#;

    #[test]
    fn failed_save_keeps_edits_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixes.geojson");
        fs::write(&path, FIXES).unwrap();
        let mut dataset = FileDataset::open(&path).unwrap();

        dataset.add_field("bearingN", FieldType::Float).unwrap();
        let fields = vec!["bearingN".to_string()];
        let row = Row {
            xy: None,
            values: vec![Value::Number(321.5)],
        };
        dataset.write_row(0, &fields, &row).unwrap();

        // A non-empty directory in the file's place makes the rename fail.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "").unwrap();
        assert!(dataset.flush().is_err());
        assert!(!dir.path().join(".fixes.geojson.tmp").exists());

        fs::remove_dir_all(&path).unwrap();
        dataset.flush().unwrap();
        let saved = FileDataset::open(&path).unwrap();
        assert_eq!(
            saved.read_row(0, &fields).unwrap().values,
            vec![Value::Number(321.5)]
        );
    }

    #[test]
    fn unchanged_dataset_is_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixes.geojson");
        fs::write(&path, FIXES).unwrap();
        let mut dataset = FileDataset::open(&path).unwrap();
        dataset.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), FIXES);
    }
}
