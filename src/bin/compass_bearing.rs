use anyhow::{bail, Context};
use calc_gps_bearings::{compass_bearing, LatLon};
use clap::{Arg, Command};
use tracing::{error, trace};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let m = Command::new("compass_bearing")
        .version("1.0.0")
        .about("Prints the initial compass bearing from one latitude/longitude to another.")
        .arg(
            Arg::new("from")
                .required(true)
                .value_name("LAT,LON")
                .allow_negative_numbers(true)
                .help("Starting point, e.g. 40.68,-98.85"),
        )
        .arg(
            Arg::new("to")
                .required(true)
                .value_name("LAT,LON")
                .allow_negative_numbers(true)
                .help("Destination point, e.g. 59.5,-113.5"),
        )
        .get_matches();

    let from = parse_lat_lon(m.get_one::<String>("from").unwrap()).context("invalid starting point")?;
    let to = parse_lat_lon(m.get_one::<String>("to").unwrap()).context("invalid destination")?;
    trace!("from {from} to {to}");

    println!("{:.6}", compass_bearing(from, to));
    Ok(())
}

fn parse_lat_lon(text: &str) -> anyhow::Result<LatLon> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>().with_context(|| format!("'{v}' is not a number")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let point = LatLon::try_from(values.as_slice())?;
    if !(-90.0..=90.0).contains(&point.lat) {
        bail!("latitude {} is outside [-90, 90]", point.lat);
    }
    Ok(point)
}
