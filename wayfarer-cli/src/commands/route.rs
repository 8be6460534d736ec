//! Route computation command.

use clap::Args;
use wayfarer::coord::GeoPoint;
use wayfarer::DataEngine;

use crate::error::CliError;

/// Arguments for `wayfarer route`.
#[derive(Debug, Args)]
pub struct RouteArgs {
    /// Start latitude
    #[arg(long)]
    pub from_lat: f64,

    /// Start longitude
    #[arg(long)]
    pub from_lon: f64,

    /// Destination latitude
    #[arg(long)]
    pub to_lat: f64,

    /// Destination longitude
    #[arg(long)]
    pub to_lon: f64,

    /// Print every waypoint instead of a summary
    #[arg(long)]
    pub waypoints: bool,
}

/// Run a route query over the locally stored road graph.
pub fn run(engine: &DataEngine, args: RouteArgs) -> Result<(), CliError> {
    let finder = engine.route_finder()?;

    let start = GeoPoint::new(args.from_lat, args.from_lon);
    let end = GeoPoint::new(args.to_lat, args.to_lon);

    match finder.find_route(start, end) {
        Some(path) => {
            println!(
                "Route found: {:.1} km over {} waypoints",
                path.distance_m / 1000.0,
                path.points.len()
            );
            if args.waypoints {
                for point in &path.points {
                    println!("  {}", point);
                }
            }
        }
        None => {
            // A missing route is a normal outcome, not a failure
            println!("No route found - the area may not be downloaded yet.");
        }
    }

    Ok(())
}
