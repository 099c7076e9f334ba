use std::collections::{BTreeSet, HashMap};

use geo::Centroid;

use super::{FeatureDataset, FieldType, Row, SpatialReference, Value};
use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Field {
    pub name: String,
    pub field_type: Option<FieldType>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Feature {
    pub geometry: Option<geo::Geometry>,
    pub attributes: HashMap<String, Value>,
}

impl Feature {
    pub fn new(geometry: impl Into<geo::Geometry>) -> Self {
        Self {
            geometry: Some(geometry.into()),
            attributes: HashMap::new(),
        }
    }

    pub fn point(x: f64, y: f64) -> Self {
        Self::new(geo::Point::new(x, y))
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(field.to_string(), value.into());
        self
    }

    fn xy(&self) -> Option<geo::Point> {
        match self.geometry.as_ref()? {
            geo::Geometry::Point(p) => Some(*p),
            other => other.centroid(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FeatureTable {
    name: String,
    spatial_reference: SpatialReference,
    fields: Vec<Field>,
    features: Vec<Feature>,
    dirty: BTreeSet<String>,
}

impl FeatureTable {
    pub fn new(name: impl Into<String>, spatial_reference: SpatialReference) -> Self {
        Self {
            name: name.into(),
            spatial_reference,
            fields: Vec::new(),
            features: Vec::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn declare_field(&mut self, name: &str, field_type: Option<FieldType>) {
        if !self.has_field(name) {
            self.fields.push(Field {
                name: name.to_string(),
                field_type,
            });
        }
    }

    pub fn push(&mut self, feature: Feature) {
        for name in feature.attributes.keys() {
            if !self.has_field(name) {
                self.fields.push(Field {
                    name: name.clone(),
                    field_type: None,
                });
            }
        }
        self.features.push(feature);
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.field_type)
    }

    fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Fields added or written since the last save, in name order.
    pub(crate) fn dirty_fields(&self) -> Vec<String> {
        self.dirty.iter().cloned().collect()
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    fn check_index(&self, index: usize) -> Result<(), StoreError> {
        if index >= self.features.len() {
            return Err(StoreError::new(format!(
                "row {index} is out of range for '{}' ({} rows)",
                self.name,
                self.features.len()
            )));
        }
        Ok(())
    }

    fn check_fields(&self, fields: &[String]) -> Result<(), StoreError> {
        match fields.iter().find(|f| !self.has_field(f)) {
            Some(missing) => Err(StoreError::new(format!(
                "cannot find field '{missing}' in '{}'",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

impl FeatureDataset for FeatureTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn spatial_reference(&self) -> Result<SpatialReference, StoreError> {
        Ok(self.spatial_reference.clone())
    }

    fn field_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.fields.iter().map(|f| f.name.clone()).collect())
    }

    fn add_field(&mut self, name: &str, field_type: FieldType) -> Result<(), StoreError> {
        if self.has_field(name) {
            return Err(StoreError::new(format!(
                "field '{name}' already exists in '{}'",
                self.name
            )));
        }
        self.fields.push(Field {
            name: name.to_string(),
            field_type: Some(field_type),
        });
        for feature in &mut self.features {
            feature.attributes.insert(name.to_string(), Value::Null);
        }
        self.dirty.insert(name.to_string());
        Ok(())
    }

    fn shapes(&self) -> Result<Vec<Option<geo::Point>>, StoreError> {
        Ok(self.features.iter().map(Feature::xy).collect())
    }

    fn row_count(&self) -> usize {
        self.features.len()
    }

    fn read_row(&self, index: usize, fields: &[String]) -> Result<Row, StoreError> {
        self.check_index(index)?;
        self.check_fields(fields)?;
        let feature = &self.features[index];
        let values = fields
            .iter()
            .map(|f| feature.attributes.get(f).cloned().unwrap_or(Value::Null))
            .collect();
        Ok(Row {
            xy: feature.xy(),
            values,
        })
    }

    fn write_row(&mut self, index: usize, fields: &[String], row: &Row) -> Result<(), StoreError> {
        self.check_index(index)?;
        self.check_fields(fields)?;
        if fields.len() != row.values.len() {
            return Err(StoreError::new(format!(
                "row has {} value(s) for {} field(s)",
                row.values.len(),
                fields.len()
            )));
        }
        let feature = &mut self.features[index];
        for (field, value) in fields.iter().zip(&row.values) {
            feature.attributes.insert(field.clone(), value.clone());
            self.dirty.insert(field.clone());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.dirty.clear();
        Ok(())
    }
}
