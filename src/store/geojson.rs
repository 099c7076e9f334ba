//! GeoJSON feature collections, including the legacy `crs` member.

use std::io::Write;

use serde::Deserialize;
use serde_json::{Map, Value as Json};
use tracing::{trace, warn};

use super::{Feature, FeatureTable, SpatialReference, Value};
use crate::error::StoreError;

#[derive(Deserialize)]
#[serde(tag = "type")]
enum GeoJsonGeometry {
    Point {
        coordinates: Vec<f64>,
    },
    MultiPoint {
        coordinates: Vec<Vec<f64>>,
    },
    LineString {
        coordinates: Vec<Vec<f64>>,
    },
    MultiLineString {
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    Polygon {
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Vec<f64>>>>,
    },
    GeometryCollection {
        geometries: Vec<GeoJsonGeometry>,
    },
}

impl GeoJsonGeometry {
    fn to_geo(&self) -> Result<geo::Geometry, StoreError> {
        fn coord(position: &[f64]) -> Result<geo::Coord, StoreError> {
            match position {
                [x, y, ..] => Ok(geo::coord! { x: *x, y: *y }),
                _ => Err(StoreError::new(format!(
                    "position needs at least two numbers, got {}",
                    position.len()
                ))),
            }
        }
        fn line(positions: &[Vec<f64>]) -> Result<geo::LineString, StoreError> {
            Ok(geo::LineString::new(
                positions.iter().map(|p| coord(p)).collect::<Result<_, _>>()?,
            ))
        }
        fn polygon(rings: &[Vec<Vec<f64>>]) -> Result<geo::Polygon, StoreError> {
            let mut rings = rings.iter().map(|r| line(r));
            let exterior = rings.next().transpose()?.unwrap_or_else(|| geo::LineString::new(Vec::new()));
            let interiors = rings.collect::<Result<Vec<_>, _>>()?;
            Ok(geo::Polygon::new(exterior, interiors))
        }

        let geometry = match self {
            GeoJsonGeometry::Point { coordinates } => geo::Point::from(coord(coordinates)?).into(),
            GeoJsonGeometry::MultiPoint { coordinates } => geo::MultiPoint::new(
                coordinates
                    .iter()
                    .map(|p| coord(p).map(geo::Point::from))
                    .collect::<Result<_, _>>()?,
            )
            .into(),
            GeoJsonGeometry::LineString { coordinates } => line(coordinates)?.into(),
            GeoJsonGeometry::MultiLineString { coordinates } => geo::MultiLineString::new(
                coordinates.iter().map(|l| line(l)).collect::<Result<_, _>>()?,
            )
            .into(),
            GeoJsonGeometry::Polygon { coordinates } => polygon(coordinates)?.into(),
            GeoJsonGeometry::MultiPolygon { coordinates } => geo::MultiPolygon::new(
                coordinates.iter().map(|p| polygon(p)).collect::<Result<_, _>>()?,
            )
            .into(),
            GeoJsonGeometry::GeometryCollection { geometries } => {
                geo::Geometry::GeometryCollection(geo::GeometryCollection::from(
                    geometries
                        .iter()
                        .map(GeoJsonGeometry::to_geo)
                        .collect::<Result<Vec<_>, _>>()?,
                ))
            }
        };
        Ok(geometry)
    }
}

/// Maps a named `crs` to the display name of its reference system.
fn spatial_reference(doc: &Json) -> SpatialReference {
    let Some(name) = doc
        .pointer("/crs/properties/name")
        .and_then(Json::as_str)
    else {
        // RFC 7946: no crs member means WGS-84 longitude/latitude.
        return SpatialReference::wgs84();
    };

    let code = name
        .rsplit(|c: char| c == ':' || c == '/')
        .next()
        .unwrap_or(name)
        .to_ascii_uppercase();
    match code.as_str() {
        "CRS84" | "4326" => SpatialReference::wgs84(),
        "3857" | "900913" => SpatialReference::named("WGS_1984_Web_Mercator_Auxiliary_Sphere"),
        _ => SpatialReference::named(name),
    }
}

fn features(doc: &Json) -> Result<&Vec<Json>, StoreError> {
    match doc.get("type").and_then(Json::as_str) {
        Some("FeatureCollection") => doc
            .get("features")
            .and_then(Json::as_array)
            .ok_or_else(|| StoreError::new("FeatureCollection has no 'features' array")),
        Some(other) => Err(StoreError::new(format!(
            "expected a FeatureCollection, found '{other}'"
        ))),
        None => Err(StoreError::new("GeoJSON document has no 'type'")),
    }
}

fn to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
        Json::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Text(s) => Json::String(s.clone()),
    }
}

pub(super) fn load(name: &str, text: &str) -> Result<(Json, FeatureTable), StoreError> {
    let doc: Json = serde_json::from_str(text)
        .map_err(|e| StoreError::from_error("failed to parse GeoJSON", &e))?;

    let sr = spatial_reference(&doc);
    let mut table = FeatureTable::new(name, sr.clone());
    for (i, feature) in features(&doc)?.iter().enumerate() {
        let geometry = match feature.get("geometry") {
            None | Some(Json::Null) => None,
            Some(g) => {
                let parsed = GeoJsonGeometry::deserialize(g)
                    .map_err(|e| StoreError::from_error(format!("feature {i}: bad geometry"), &e))?;
                Some(parsed.to_geo().map_err(|e| {
                    e.with(crate::error::Severity::Error, format!("feature {i}: bad coordinates"))
                })?)
            }
        };

        let mut attributes = std::collections::HashMap::new();
        if let Some(properties) = feature.get("properties").and_then(Json::as_object) {
            for (key, value) in properties {
                table.declare_field(key, None);
                attributes.insert(key.clone(), to_value(value));
            }
        }
        table.push(Feature {
            geometry,
            attributes,
        });
    }
    trace!(
        "GeoJSON '{name}': {} feature(s) in {}",
        table.features().len(),
        sr
    );

    Ok((doc, table))
}

pub(super) fn apply(doc: &mut Json, table: &FeatureTable, fields: &[String]) -> Result<(), StoreError> {
    let features = doc
        .get_mut("features")
        .and_then(Json::as_array_mut)
        .ok_or_else(|| StoreError::new("FeatureCollection has no 'features' array"))?;
    if features.len() != table.features().len() {
        return Err(StoreError::new(format!(
            "document holds {} feature(s) but the table holds {}",
            features.len(),
            table.features().len()
        )));
    }

    for (json, feature) in features.iter_mut().zip(table.features()) {
        let Some(object) = json.as_object_mut() else {
            warn!("skipping a feature that is not a JSON object");
            continue;
        };
        let properties = object
            .entry("properties")
            .or_insert_with(|| Json::Object(Map::new()));
        if !properties.is_object() {
            *properties = Json::Object(Map::new());
        }
        if let Some(properties) = properties.as_object_mut() {
            for field in fields {
                let value = feature.attributes.get(field).cloned().unwrap_or(Value::Null);
                properties.insert(field.clone(), to_json(&value));
            }
        }
    }
    Ok(())
}

pub(super) fn write<W: Write>(doc: &Json, writer: &mut W) -> Result<(), StoreError> {
    serde_json::to_writer_pretty(&mut *writer, doc)
        .map_err(|e| StoreError::from_error("failed to write GeoJSON", &e))?;
    writeln!(writer).map_err(|e| StoreError::from_error("failed to write GeoJSON", &e))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::{FeatureDataset, FieldType};
    use serde_json::json;

    fn collection(crs: Option<&str>) -> String {
        let mut doc = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "bird": "WC-7", "speed": 4.5 },
                    "geometry": { "type": "Point", "coordinates": [-98.85, 40.68] }
                },
                {
                    "type": "Feature",
                    "properties": null,
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[-97, 28], [-96, 28], [-96, 29], [-97, 29], [-97, 28]]]
                    }
                }
            ]
        });
        if let Some(name) = crs {
            doc["crs"] = json!({ "type": "name", "properties": { "name": name } });
        }
        doc.to_string()
    }

    #[test]
    fn crs_names() {
        let sr = |crs| spatial_reference(&serde_json::from_str(&collection(crs)).unwrap());
        assert!(sr(None).is_wgs84());
        assert!(sr(Some("urn:ogc:def:crs:OGC:1.3:CRS84")).is_wgs84());
        assert!(sr(Some("EPSG:4326")).is_wgs84());
        assert!(sr(Some("urn:ogc:def:crs:EPSG::4326")).is_wgs84());
        assert_eq!(
            sr(Some("urn:ogc:def:crs:EPSG::3857")).name,
            "WGS_1984_Web_Mercator_Auxiliary_Sphere"
        );
        assert_eq!(sr(Some("EPSG:26914")).name, "EPSG:26914");
    }

    #[test]
    fn loads_features() {
        let (_, table) = load("gps", &collection(None)).unwrap();
        assert_eq!(table.row_count(), 2);
        let mut names = table.field_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["bird", "speed"]);

        let shapes = table.shapes().unwrap();
        assert_eq!(shapes[0], Some(geo::Point::new(-98.85, 40.68)));
        let centre = shapes[1].unwrap();
        assert!((centre.x() + 96.5).abs() < 1e-9 && (centre.y() - 28.5).abs() < 1e-9);
    }

    #[test]
    fn apply_sets_properties() {
        let (mut doc, mut table) = load("gps", &collection(None)).unwrap();
        table.add_field("bearingS", FieldType::Float).unwrap();
        let fields = vec!["bearingS".to_string()];
        let mut row = table.read_row(0, &fields).unwrap();
        row.values[0] = Value::Number(172.25);
        table.write_row(0, &fields, &row).unwrap();

        apply(&mut doc, &table, &fields).unwrap();
        assert_eq!(doc["features"][0]["properties"]["bearingS"], json!(172.25));
        assert_eq!(doc["features"][0]["properties"]["bird"], json!("WC-7"));
        assert_eq!(doc["features"][1]["properties"]["bearingS"], Json::Null);
    }

    #[test]
    fn geometry_collection_resolves_to_centroid() {
        let text = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "GeometryCollection",
                    "geometries": [
                        { "type": "Point", "coordinates": [-99.0, 40.0] },
                        { "type": "Point", "coordinates": [-98.0, 41.0] }
                    ]
                }
            }]
        })
        .to_string();
        let (_, table) = load("roosts", &text).unwrap();
        let centre = table.shapes().unwrap()[0].unwrap();
        assert!((centre.x() + 98.5).abs() < 1e-9, "x = {}", centre.x());
        assert!((centre.y() - 40.5).abs() < 1e-9, "y = {}", centre.y());
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(load("gps", "{").is_err());
        assert!(load("gps", r#"{"type": "Feature"}"#).is_err());
        let bad_point = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [1.0]}}
        ]}"#;
        let err = load("gps", bad_point).unwrap_err();
        assert!(err.messages().iter().any(|d| d.message.contains("feature 0")));
    }
}
