use calc_gps_bearings::report::Console;
use calc_gps_bearings::{calculate_bearings, Inputs};
use clap::{builder::PathBufValueParser, Arg, Command};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let inputs = parse_cmdline();
    info!(
        "GPS points '{}', north '{}', south '{}'",
        inputs.gps_points.display(),
        inputs.dest_north.display(),
        inputs.dest_south.display()
    );

    // Failures have already been turned into messages.
    let summary = calculate_bearings(&inputs, &Console);
    debug!(
        "{} record(s) in {:?}, failed = {}",
        summary.updated,
        summary.elapsed,
        summary.error.is_some()
    );
}

fn parse_cmdline() -> Inputs {
    let path_arg = |id: &'static str, value_name: &'static str, help: &'static str| {
        Arg::new(id)
            .required(true)
            .value_name(value_name)
            .value_parser(PathBufValueParser::new())
            .help(help)
    };

    let cmd = Command::new("calc_gps_bearings")
        .version("1.0.0")
        .about("Calculates the compass bearing from every GPS telemetry point toward a northern and a southern destination and stores them in the 'bearingN' and 'bearingS' fields.")
        .arg(path_arg(
            "gps_points",
            "GPS-POINTS",
            "The GPS telemetry point dataset (.kml, .geojson or .json) to update in place.",
        ))
        .arg(path_arg(
            "dest_north",
            "DEST-NORTH",
            "The northern destination feature; an area resolves to its centroid.",
        ))
        .arg(path_arg(
            "dest_south",
            "DEST-SOUTH",
            "The southern destination feature; an area resolves to its centroid.",
        ));

    let m = cmd.get_matches();
    let path = |id: &str| m.get_one::<PathBuf>(id).unwrap().clone();
    Inputs {
        gps_points: path("gps_points"),
        dest_north: path("dest_north"),
        dest_south: path("dest_south"),
    }
}
