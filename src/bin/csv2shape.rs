use std::path::PathBuf;

use clap::Parser;
use geolab::app::config::Config;
use geolab::app::init_logging;
use geolab::convert::csv_points::csv_to_shapefile;

/// Convert a CSV of `latitude,longitude,name,number` rows into a WGS84 point shapefile.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// CSV file with a header line.
    csv_filepath: PathBuf,

    /// Output shapefile. Defaults to the CSV path with a .shp extension.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to the YAML config file.
    #[arg(short, long)]
    config_filepath: Option<PathBuf>,
}

fn try_main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config_filepath.as_deref())?;
    let output = csv_to_shapefile(
        &args.csv_filepath,
        args.output.as_deref(),
        &config.write_options(),
    )?;
    println!("Wrote {}", output.display());
    Ok(())
}

fn main() {
    init_logging();
    if let Err(e) = try_main() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1)
    }
}
