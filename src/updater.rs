//! The batch pass: bearings from every GPS fix toward the northern and
//! southern destinations, written back onto the fixes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use crate::bearing::{compass_bearing, LatLon};
use crate::error::{BearingError, Severity, StoreError};
use crate::report::{CompletionReport, Level, MessageSink};
use crate::store::{self, FeatureDataset, FieldType, UpdateCursor, Value};

pub const NORTH_FIELD: &str = "bearingN";
pub const SOUTH_FIELD: &str = "bearingS";

#[derive(Clone, Debug)]
pub struct Inputs {
    pub gps_points: PathBuf,
    pub dest_north: PathBuf,
    pub dest_south: PathBuf,
}

#[derive(Debug)]
pub struct RunSummary {
    pub updated: usize,
    pub elapsed: Duration,
    pub error: Option<BearingError>,
}

/// "name (reference)" for each dataset not in WGS-84.
fn not_wgs84(datasets: &[&dyn FeatureDataset]) -> Result<Vec<String>, StoreError> {
    let mut out = Vec::new();
    for dataset in datasets {
        let sr = dataset.spatial_reference()?;
        debug!("'{}' spatial reference: {sr}", dataset.name());
        if !sr.is_wgs84() {
            out.push(format!("{} ({sr})", dataset.name()));
        }
    }
    Ok(out)
}

pub struct BatchUpdater<'a> {
    sink: &'a dyn MessageSink,
}

impl<'a> BatchUpdater<'a> {
    pub fn new(sink: &'a dyn MessageSink) -> Self {
        Self { sink }
    }

    /// Fails unless every dataset reports the WGS-84 geographic system.
    /// Destinations are checked first so their mismatch is the one reported.
    pub fn check_spatial_references(
        &self,
        points: &dyn FeatureDataset,
        north: &dyn FeatureDataset,
        south: &dyn FeatureDataset,
    ) -> Result<(), BearingError> {
        let destinations = not_wgs84(&[north, south])?;
        if !destinations.is_empty() {
            return Err(BearingError::Projection {
                subject: "Destination files are",
                mismatched: destinations,
            });
        }
        let gps = not_wgs84(&[points])?;
        if !gps.is_empty() {
            return Err(BearingError::Projection {
                subject: "GPS points are",
                mismatched: gps,
            });
        }
        Ok(())
    }

    /// With several features, the last one wins.
    pub fn destination(
        &self,
        dataset: &dyn FeatureDataset,
        points_name: &str,
    ) -> Result<LatLon, BearingError> {
        let shapes = dataset.shapes()?;
        if shapes.len() > 1 {
            self.sink.warning(&format!(
                "Destination '{}' holds {} features...using the last one!",
                dataset.name(),
                shapes.len()
            ));
        }
        let Some(last) = shapes.last() else {
            return Err(BearingError::unexpected(
                points_name,
                anyhow!("destination '{}' has no features", dataset.name()),
            ));
        };
        let Some(xy) = last else {
            return Err(BearingError::unexpected(
                points_name,
                anyhow!("destination '{}' has no usable geometry", dataset.name()),
            ));
        };
        let location = LatLon::from_xy(*xy);
        debug!("destination '{}' at {location}", dataset.name());
        Ok(location)
    }

    /// Makes sure both bearing fields exist; existing ones are overwritten.
    pub fn provision_fields(&self, points: &mut dyn FeatureDataset) -> Result<(), BearingError> {
        let existing = points.field_names()?;
        for field in [NORTH_FIELD, SOUTH_FIELD] {
            if existing.iter().any(|f| f == field) {
                self.sink.warning(&format!(
                    "Field '{field}' already exists...existing values will be overwritten!"
                ));
            } else {
                points.add_field(field, FieldType::Float)?;
                debug!("added field '{field}' to '{}'", points.name());
            }
        }
        Ok(())
    }

    /// Nothing is written when the reference check fails. A pass that aborts
    /// partway still saves the records it counted.
    pub fn update(
        &self,
        points: &mut dyn FeatureDataset,
        north: &dyn FeatureDataset,
        south: &dyn FeatureDataset,
        report: &mut CompletionReport<'_>,
    ) -> Result<usize, BearingError> {
        self.check_spatial_references(&*points, north, south)?;

        let name = points.name().to_string();
        let north_at = self.destination(north, &name)?;
        let south_at = self.destination(south, &name)?;

        self.provision_fields(points)?;

        let pass = self.bearing_pass(points, north_at, south_at, &name, report);
        if let Err(save_err) = points.flush() {
            report.discard_updates();
            return Err(match pass {
                Ok(()) => save_err.into(),
                Err(pass_err) => {
                    for diagnostic in save_err.messages() {
                        error!("saving finished records: {diagnostic}");
                    }
                    pass_err
                }
            });
        }
        pass?;

        self.sink
            .info("Calculated compass bearings added to GPS point feature class...");
        Ok(report.updated())
    }

    fn bearing_pass(
        &self,
        points: &mut dyn FeatureDataset,
        north_at: LatLon,
        south_at: LatLon,
        name: &str,
        report: &mut CompletionReport<'_>,
    ) -> Result<(), BearingError> {
        let mut cursor = UpdateCursor::new(points, &[NORTH_FIELD, SOUTH_FIELD])?;
        while let Some(mut row) = cursor.next_row()? {
            let Some(xy) = row.xy else {
                return Err(BearingError::unexpected(
                    name,
                    anyhow!("record {} has no geometry", report.updated() + 1),
                ));
            };
            let here = LatLon::from_xy(xy);
            row.values = vec![
                Value::from(compass_bearing(here, north_at)),
                Value::from(compass_bearing(here, south_at)),
            ];
            cursor.update_row(&row)?;
            report.record_update();
        }
        Ok(())
    }

    pub fn report_error(&self, err: &BearingError) {
        match err {
            BearingError::Projection { mismatched, .. } => {
                self.sink.error(&err.to_string());
                warn!("not in {}: {}", store::WGS84_NAME, mismatched.join(", "));
            }
            BearingError::Store(store_err) => {
                for diagnostic in store_err.messages() {
                    let level = match diagnostic.severity {
                        Severity::Informative => Level::Info,
                        Severity::Warning => Level::Warning,
                        Severity::Error => Level::Error,
                    };
                    self.sink.message(level, &diagnostic.to_string());
                }
            }
            BearingError::Unexpected { source, .. } => {
                self.sink.error(&err.to_string());
                error!("{source:#}");
            }
        }
    }

    fn run_files(
        &self,
        inputs: &Inputs,
        report: &mut CompletionReport<'_>,
    ) -> Result<usize, BearingError> {
        let north = store::open(&inputs.dest_north)?;
        let south = store::open(&inputs.dest_south)?;
        let mut points = store::open(&inputs.gps_points)?;
        info!(
            "{} GPS record(s) in '{}'",
            points.row_count(),
            inputs.gps_points.display()
        );
        self.update(&mut points, &north, &south, report)
    }
}

pub fn calculate_bearings(inputs: &Inputs, sink: &dyn MessageSink) -> RunSummary {
    let mut report = CompletionReport::start(sink);
    let updater = BatchUpdater::new(sink);

    let result = updater.run_files(inputs, &mut report);
    if let Err(err) = &result {
        updater.report_error(err);
    }

    let (updated, elapsed) = report.finish();
    RunSummary {
        updated,
        elapsed,
        error: result.err(),
    }
}
