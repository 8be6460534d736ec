//! Region tile download command.

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use wayfarer::coord::GeoPoint;
use wayfarer::tiles::{ProgressCallback, RegionRequest};
use wayfarer::DataEngine;

use crate::error::CliError;

/// Arguments for `wayfarer download`.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Center latitude in degrees
    #[arg(long)]
    pub lat: f64,

    /// Center longitude in degrees
    #[arg(long)]
    pub lon: f64,

    /// Radius around the center to cover, in kilometers
    #[arg(long, default_value_t = 5.0)]
    pub radius_km: f64,

    /// Zoom levels to download (comma separated)
    #[arg(long, value_delimiter = ',', default_value = "12,14,16")]
    pub zoom: Vec<u8>,
}

/// Run a region download with a progress bar and ctrl-c cancellation.
pub async fn run(engine: &DataEngine, args: DownloadArgs) -> Result<(), CliError> {
    if args.zoom.is_empty() {
        return Err(CliError::InvalidArgs(
            "at least one zoom level is required".to_string(),
        ));
    }

    let request = RegionRequest {
        center: GeoPoint::new(args.lat, args.lon),
        radius_km: args.radius_km,
        zoom_levels: args.zoom,
    };

    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    // Best effort: a second handler registration (e.g. in tests) is fine to ignore
    let _ = ctrlc::set_handler(move || ctrlc_cancel.cancel());

    let bar = ProgressBar::new(1);
    if let Ok(style) =
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} tiles ({percent}%)")
    {
        bar.set_style(style);
    }

    let bar_for_progress = bar.clone();
    let progress: ProgressCallback = Box::new(move |completed, total| {
        bar_for_progress.set_length(total as u64);
        bar_for_progress.set_position(completed as u64);
    });

    println!(
        "Downloading tiles around ({:.4}, {:.4}), radius {} km, zooms {:?}",
        args.lat, args.lon, args.radius_km, request.zoom_levels
    );

    let report = engine
        .tiles()
        .download_region(&request, Some(progress), &cancel)
        .await?;

    bar.finish_and_clear();
    println!("{}", report);

    Ok(())
}
