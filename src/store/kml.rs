//! KML documents as feature collections: one feature per `Placemark`,
//! attributes in `ExtendedData`.

use std::collections::HashMap;
use std::io::Write;

use ::kml::types::{Coord, Element, Geometry, Placemark};
use ::kml::{Kml, KmlWriter};
use itertools::Itertools;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::trace;

use super::{Feature, FeatureDataset, FeatureTable, FieldType, SpatialReference, Value};
use crate::error::StoreError;

pub(super) fn load(name: &str, text: &str) -> Result<(Kml, FeatureTable), StoreError> {
    let mut kml = text
        .parse::<Kml>()
        .map_err(|e| StoreError::from_error("failed to parse KML", &e))?;
    let schemas = scan_schemas(text)?;
    restore_schemas(&mut kml, &mut schemas.into_iter());

    // KML 2.2 coordinates are always WGS-84 longitude/latitude.
    let mut table = FeatureTable::new(name, SpatialReference::wgs84());

    let mut schema_fields = Vec::new();
    collect_schema_fields(&kml, &mut schema_fields);
    for (field, field_type) in &schema_fields {
        table.declare_field(field, *field_type);
    }

    let mut placemarks = Vec::new();
    collect_placemarks(&kml, &mut placemarks);
    for placemark in placemarks {
        let attributes = extended_data(placemark);
        let data_fields = attributes.iter().map(|(k, _)| k.clone()).unique().collect_vec();
        for field in &data_fields {
            table.declare_field(field, None);
        }
        table.push(Feature {
            geometry: placemark.geometry.as_ref().and_then(to_geo),
            attributes: attributes.into_iter().collect(),
        });
    }
    trace!("KML '{name}': {} placemark(s)", table.features().len());

    Ok((kml, table))
}

/// A typed field with no `<SimpleField>` yet is declared in a document
/// schema and stored as `<SimpleData>`; untyped fields go to `<Data>`.
pub(super) fn apply(kml: &mut Kml, table: &FeatureTable, fields: &[String]) -> Result<(), StoreError> {
    let placemark_count = {
        let mut placemarks = Vec::new();
        collect_placemarks(kml, &mut placemarks);
        placemarks.len()
    };
    if placemark_count != table.features().len() {
        return Err(StoreError::new(format!(
            "document holds {placemark_count} placemark(s) but the table holds {} feature(s)",
            table.features().len()
        )));
    }

    let schema_id = schema_id(table.name());
    let mut schema_of = HashMap::new();
    for field in fields {
        let mut declared = schema_declaring(kml, field);
        if declared.is_none() {
            if let Some(field_type) = table.field_type(field) {
                if declare_field(kml, &schema_id, field, field_type) {
                    declared = Some(schema_id.clone());
                }
            }
        }
        schema_of.insert(field.as_str(), declared);
    }

    let mut placemarks = Vec::new();
    collect_placemarks_mut(kml, &mut placemarks);
    for (placemark, feature) in placemarks.into_iter().zip(table.features()) {
        for field in fields {
            let value = feature.attributes.get(field).cloned().unwrap_or(Value::Null);
            let schema = schema_of.get(field.as_str()).cloned().flatten();
            set_extended_value(placemark, field, &value, schema.as_deref());
        }
    }
    Ok(())
}

pub(super) fn write<W: Write>(kml: &Kml, writer: &mut W) -> Result<(), StoreError> {
    KmlWriter::from_writer(writer)
        .write(kml)
        .map_err(|e| StoreError::from_error("failed to write KML", &e))
}

fn collect_placemarks<'a>(kml: &'a Kml, out: &mut Vec<&'a Placemark>) {
    match kml {
        Kml::KmlDocument(doc) => {
            for element in &doc.elements {
                collect_placemarks(element, out);
            }
        }
        Kml::Document { elements, .. } | Kml::Folder { elements, .. } => {
            for element in elements {
                collect_placemarks(element, out);
            }
        }
        Kml::Placemark(placemark) => out.push(placemark),
        _ => {}
    }
}

fn collect_placemarks_mut<'a>(kml: &'a mut Kml, out: &mut Vec<&'a mut Placemark>) {
    match kml {
        Kml::KmlDocument(doc) => {
            for element in doc.elements.iter_mut() {
                collect_placemarks_mut(element, out);
            }
        }
        Kml::Document { elements, .. } | Kml::Folder { elements, .. } => {
            for element in elements.iter_mut() {
                collect_placemarks_mut(element, out);
            }
        }
        Kml::Placemark(placemark) => out.push(placemark),
        _ => {}
    }
}

/// `<Schema><SimpleField name=".." type=".."/></Schema>` declarations.
fn collect_schema_fields(kml: &Kml, out: &mut Vec<(String, Option<FieldType>)>) {
    match kml {
        Kml::KmlDocument(doc) => doc.elements.iter().for_each(|e| collect_schema_fields(e, out)),
        Kml::Document { elements, .. } | Kml::Folder { elements, .. } => {
            elements.iter().for_each(|e| collect_schema_fields(e, out))
        }
        Kml::Element(element) if element.name == "Schema" => {
            for field in element.children.iter().filter(|c| c.name == "SimpleField") {
                if let Some(name) = field.attrs.get("name") {
                    let field_type = field.attrs.get("type").and_then(|t| t.parse().ok());
                    out.push((name.clone(), field_type));
                }
            }
        }
        _ => {}
    }
}

/// `<Schema>` declarations read straight from the text, in document order.
/// The `kml` reader stops at the first self-closing `<SimpleField/>`, so
/// its tree is missing them.
fn scan_schemas(text: &str) -> Result<Vec<Element>, StoreError> {
    let mut reader = Reader::from_str(text);
    let mut schemas = Vec::new();
    let mut current: Option<Element> = None;
    loop {
        let event = reader
            .read_event()
            .map_err(|e| StoreError::from_error("failed to parse KML", &e))?;
        match event {
            Event::Start(e) if e.local_name().as_ref() == b"Schema" => {
                current = Some(scanned_element(&e)?);
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"SimpleField" => {
                if let Some(schema) = current.as_mut() {
                    schema.children.push(scanned_element(&e)?);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"Schema" => {
                schemas.extend(current.take());
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(schemas)
}

fn scanned_element(start: &BytesStart) -> Result<Element, StoreError> {
    let mut attrs = HashMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| StoreError::from_error("bad KML attribute", &e))?;
        let value = attr
            .unescape_value()
            .map_err(|e| StoreError::from_error("bad KML attribute", &e))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        attrs.insert(key, value.into_owned());
    }
    Ok(Element {
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attrs,
        content: None,
        children: Vec::new(),
    })
}

/// Puts scanned `<SimpleField>`s back under their `<Schema>` and drops the
/// ones the `kml` reader left loose beside it.
fn restore_schemas(kml: &mut Kml, scanned: &mut impl Iterator<Item = Element>) {
    let elements = match kml {
        Kml::KmlDocument(doc) => &mut doc.elements,
        Kml::Document { elements, .. } | Kml::Folder { elements, .. } => elements,
        _ => return,
    };
    elements.retain(|e| !matches!(e, Kml::Element(el) if el.name == "SimpleField"));
    for element in elements.iter_mut() {
        match element {
            Kml::Element(schema) if schema.name == "Schema" => {
                let Some(found) = scanned.next() else { continue };
                for field in found.children {
                    let name = field.attrs.get("name");
                    if !schema
                        .children
                        .iter()
                        .any(|c| c.name == "SimpleField" && c.attrs.get("name") == name)
                    {
                        schema.children.push(field);
                    }
                }
            }
            other => restore_schemas(other, scanned),
        }
    }
}

fn schema_declaring(kml: &Kml, field: &str) -> Option<String> {
    match kml {
        Kml::KmlDocument(doc) => doc.elements.iter().find_map(|e| schema_declaring(e, field)),
        Kml::Document { elements, .. } | Kml::Folder { elements, .. } => {
            elements.iter().find_map(|e| schema_declaring(e, field))
        }
        Kml::Element(element) if element.name == "Schema" => {
            let declares = element
                .children
                .iter()
                .any(|c| c.name == "SimpleField" && c.attrs.get("name").map(String::as_str) == Some(field));
            if declares {
                element.attrs.get("id").or_else(|| element.attrs.get("name")).cloned()
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Adds `field` to the schema `id` of the first `<Document>`, creating the
/// schema if needed. Returns false when there is no document to hold it.
fn declare_field(kml: &mut Kml, id: &str, field: &str, field_type: FieldType) -> bool {
    let Some(elements) = first_document(kml) else {
        return false;
    };
    let position = elements
        .iter()
        .position(|e| matches!(e, Kml::Element(el) if el.name == "Schema" && el.attrs.get("id").map(String::as_str) == Some(id)));
    let index = match position {
        Some(i) => i,
        None => {
            let mut schema = element("Schema", Some(id), None, Vec::new());
            schema.attrs.insert("id".to_string(), id.to_string());
            elements.insert(0, Kml::Element(schema));
            0
        }
    };
    if let Kml::Element(schema) = &mut elements[index] {
        let mut simple_field = element("SimpleField", Some(field), None, Vec::new());
        simple_field
            .attrs
            .insert("type".to_string(), field_type.as_str().to_string());
        schema.children.push(simple_field);
    }
    true
}

fn first_document(kml: &mut Kml) -> Option<&mut Vec<Kml>> {
    match kml {
        Kml::Document { elements, .. } => Some(elements),
        Kml::KmlDocument(doc) => doc.elements.iter_mut().find_map(first_document),
        Kml::Folder { elements, .. } => elements.iter_mut().find_map(first_document),
        _ => None,
    }
}

fn schema_id(name: &str) -> String {
    let id: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    match id.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => id,
        _ => format!("_{id}"),
    }
}

fn extended_data(placemark: &Placemark) -> Vec<(String, Value)> {
    let mut values = Vec::new();
    for data in placemark.children.iter().filter(|c| c.name == "ExtendedData") {
        for child in &data.children {
            match child.name.as_str() {
                "Data" => {
                    if let Some(name) = child.attrs.get("name") {
                        let text = child
                            .children
                            .iter()
                            .find(|c| c.name == "value")
                            .and_then(|c| c.content.as_deref())
                            .unwrap_or_default();
                        values.push((name.clone(), Value::parse(text)));
                    }
                }
                "SchemaData" => {
                    for simple in child.children.iter().filter(|c| c.name == "SimpleData") {
                        if let Some(name) = simple.attrs.get("name") {
                            let text = simple.content.as_deref().unwrap_or_default();
                            values.push((name.clone(), Value::parse(text)));
                        }
                    }
                }
                _ => {}
            }
        }
    }
    values
}

fn set_extended_value(placemark: &mut Placemark, field: &str, value: &Value, schema: Option<&str>) {
    let text = value.to_string();

    let position = placemark.children.iter().position(|c| c.name == "ExtendedData");
    let extended = match position {
        Some(i) => &mut placemark.children[i],
        None => {
            placemark.children.push(element("ExtendedData", None, None, Vec::new()));
            let last = placemark.children.len() - 1;
            &mut placemark.children[last]
        }
    };

    // Typed SimpleData first, then untyped Data.
    for schema_data in extended.children.iter_mut().filter(|c| c.name == "SchemaData") {
        if let Some(simple) = schema_data
            .children
            .iter_mut()
            .find(|c| c.name == "SimpleData" && c.attrs.get("name").map(String::as_str) == Some(field))
        {
            simple.content = Some(text);
            return;
        }
    }

    if let Some(id) = schema {
        let url = format!("#{id}");
        let position = extended.children.iter().position(|c| {
            c.name == "SchemaData" && c.attrs.get("schemaUrl").map(String::as_str) == Some(url.as_str())
        });
        let schema_data = match position {
            Some(i) => &mut extended.children[i],
            None => {
                let mut schema_data = element("SchemaData", None, None, Vec::new());
                schema_data.attrs.insert("schemaUrl".to_string(), url);
                extended.children.push(schema_data);
                let last = extended.children.len() - 1;
                &mut extended.children[last]
            }
        };
        schema_data
            .children
            .push(element("SimpleData", Some(field), Some(text), Vec::new()));
        return;
    }

    let data = extended
        .children
        .iter_mut()
        .find(|c| c.name == "Data" && c.attrs.get("name").map(String::as_str) == Some(field));
    match data {
        Some(data) => match data.children.iter_mut().find(|c| c.name == "value") {
            Some(v) => v.content = Some(text),
            None => data.children.push(element("value", None, Some(text), Vec::new())),
        },
        None => {
            let value_el = element("value", None, Some(text), Vec::new());
            extended
                .children
                .push(element("Data", Some(field), None, vec![value_el]));
        }
    }
}

fn element(name: &str, name_attr: Option<&str>, content: Option<String>, children: Vec<Element>) -> Element {
    let mut attrs = HashMap::new();
    if let Some(n) = name_attr {
        attrs.insert("name".to_string(), n.to_string());
    }
    Element {
        name: name.to_string(),
        attrs,
        content,
        children,
    }
}

fn to_geo(geometry: &Geometry) -> Option<geo::Geometry> {
    fn line(coords: &[Coord]) -> geo::LineString {
        geo::LineString::new(coords.iter().map(|c| geo::coord! { x: c.x, y: c.y }).collect())
    }

    match geometry {
        Geometry::Point(p) => Some(geo::Point::new(p.coord.x, p.coord.y).into()),
        Geometry::LineString(l) => Some(line(&l.coords).into()),
        Geometry::LinearRing(r) => Some(line(&r.coords).into()),
        Geometry::Polygon(p) => {
            let interiors = p.inner.iter().map(|r| line(&r.coords)).collect();
            Some(geo::Polygon::new(line(&p.outer.coords), interiors).into())
        }
        Geometry::MultiGeometry(m) => {
            let parts = m.geometries.iter().filter_map(to_geo).collect_vec();
            if parts.is_empty() {
                None
            } else {
                Some(geo::Geometry::GeometryCollection(geo::GeometryCollection::from(parts)))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::{FeatureDataset, Row};

    const CRANES: &str = r##"<kml xmlns="http://www.opengis.net/kml/2.2">
<Document>
    <name>Cranes</name>
    <Schema name="telemetry" id="telemetry">
        <SimpleField name="speed" type="float"/>
    </Schema>
    <Folder>
        <Placemark>
            <name>fix 1</name>
            <ExtendedData>
                <SchemaData schemaUrl="#telemetry">
                    <SimpleData name="speed">4.5</SimpleData>
                </SchemaData>
                <Data name="bird"><value>WC-7</value></Data>
            </ExtendedData>
            <Point><coordinates>-98.85,40.68,0</coordinates></Point>
        </Placemark>
        <Placemark>
            <name>fix 2</name>
            <Point><coordinates>-97.5,36.1,0</coordinates></Point>
        </Placemark>
    </Folder>
</Document>
</kml>"##;

    const REFUGE: &str = r#"<kml xmlns="http://www.opengis.net/kml/2.2">
<Placemark>
    <name>Aransas</name>
    <Polygon><outerBoundaryIs><LinearRing><coordinates>
        -97,28 -96,28 -96,29 -97,29 -97,28
    </coordinates></LinearRing></outerBoundaryIs></Polygon>
</Placemark>
</kml>"#;

    #[test]
    fn loads_placemarks_and_fields() {
        let (_, table) = load("cranes", CRANES).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.field_names().unwrap(), vec!["speed", "bird"]);
        assert_eq!(table.field_type("speed"), Some(FieldType::Float));
        assert!(table.spatial_reference().unwrap().is_wgs84());

        let shapes = table.shapes().unwrap();
        assert_eq!(shapes[0], Some(geo::Point::new(-98.85, 40.68)));

        let first = &table.features()[0].attributes;
        assert_eq!(first.get("speed"), Some(&Value::Number(4.5)));
        assert_eq!(first.get("bird"), Some(&Value::Text("WC-7".to_string())));
    }

    #[test]
    fn polygon_placemark_uses_centroid() {
        let (_, table) = load("refuge", REFUGE).unwrap();
        let centre = table.shapes().unwrap()[0].unwrap();
        assert!((centre.x() + 96.5).abs() < 1e-9, "x = {}", centre.x());
        assert!((centre.y() - 28.5).abs() < 1e-9, "y = {}", centre.y());
    }

    #[test]
    fn apply_writes_data_and_simple_data() {
        let (mut kml, mut table) = load("cranes", CRANES).unwrap();
        table.add_field("bearingN", FieldType::Float).unwrap();
        let fields = vec!["bearingN".to_string(), "speed".to_string()];
        for i in 0..table.row_count() {
            let mut row = table.read_row(i, &fields).unwrap();
            row.values = vec![Value::Number(330.5), Value::Number(7.0)];
            table.write_row(i, &fields, &row).unwrap();
        }
        apply(&mut kml, &table, &fields).unwrap();

        let mut placemarks = Vec::new();
        collect_placemarks(&kml, &mut placemarks);
        let first = extended_data(placemarks[0]);
        assert!(first.contains(&("speed".to_string(), Value::Number(7.0))));
        assert!(first.contains(&("bearingN".to_string(), Value::Number(330.5))));
        let second = extended_data(placemarks[1]);
        assert!(second.contains(&("bearingN".to_string(), Value::Number(330.5))));
    }

    #[test]
    fn schema_fields_survive_a_rewrite() {
        let (mut kml, mut table) = load("cranes 2023", CRANES).unwrap();
        table.add_field("bearingN", FieldType::Float).unwrap();
        let fields = vec!["bearingN".to_string()];
        for i in 0..table.row_count() {
            let row = Row {
                xy: None,
                values: vec![Value::Number(12.25)],
            };
            table.write_row(i, &fields, &row).unwrap();
        }
        apply(&mut kml, &table, &fields).unwrap();

        let mut out = Vec::new();
        write(&kml, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(r##"schemaUrl="#cranes_2023""##), "{text}");

        let (_, reloaded) = load("cranes 2023", &text).unwrap();
        assert_eq!(reloaded.field_type("speed"), Some(FieldType::Float));
        assert_eq!(reloaded.field_type("bearingN"), Some(FieldType::Float));
        assert_eq!(reloaded.field_type("bird"), None);
        let values = reloaded.read_row(1, &fields).unwrap().values;
        assert_eq!(values, vec![Value::Number(12.25)]);
        assert_eq!(
            reloaded.features()[0].attributes.get("speed"),
            Some(&Value::Number(4.5))
        );
    }

    #[test]
    fn multi_geometry_uses_centroid_of_parts() {
        let text = r#"<kml xmlns="http://www.opengis.net/kml/2.2">
<Placemark>
    <name>Platte roosts</name>
    <MultiGeometry>
        <Point><coordinates>-99,40,0</coordinates></Point>
        <Point><coordinates>-98,41,0</coordinates></Point>
    </MultiGeometry>
</Placemark>
</kml>"#;
        let (_, table) = load("roosts", text).unwrap();
        let centre = table.shapes().unwrap()[0].unwrap();
        assert!((centre.x() + 98.5).abs() < 1e-9, "x = {}", centre.x());
        assert!((centre.y() - 40.5).abs() < 1e-9, "y = {}", centre.y());
    }

    #[test]
    fn schema_ids_are_xml_names() {
        assert_eq!(schema_id("cranes"), "cranes");
        assert_eq!(schema_id("cranes 2023"), "cranes_2023");
        assert_eq!(schema_id("2023-fixes"), "_2023_fixes");
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(load("broken", "<kml><Placemark></Folder></kml>").is_err());
    }
}
