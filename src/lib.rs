//! Compass bearings from GPS telemetry fixes toward a northern and a southern
//! destination, written back onto the fixes as `bearingN` and `bearingS`.

pub mod bearing;
pub mod error;
pub mod report;
pub mod store;
pub mod updater;

pub use bearing::{compass_bearing, LatLon};
pub use error::{BearingError, StoreError};
pub use updater::{calculate_bearings, BatchUpdater, Inputs, RunSummary, NORTH_FIELD, SOUTH_FIELD};
