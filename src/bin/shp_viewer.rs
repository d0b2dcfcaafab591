use std::path::PathBuf;

use clap::{Parser, Subcommand};
use geolab::app::config::Config;
use geolab::app::init_logging;
use geolab::app::terminal::run_terminal_shell;
use geolab::crs::crs_utils::parse_crs;
use geolab::viewer::export::export_shapefile;
use geolab::viewer::session::{ViewerSession, VIEWER_COMMANDS};
use geolab::viewer::{describe_shapefile, validate_shapefile, validation_message};

/// View a shapefile, validate its geometries and export it to another CRS.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Shapefile to open.
    shapefile: PathBuf,

    /// Path to the YAML config file.
    #[arg(short, long)]
    config_filepath: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<ViewerCommand>,
}

#[derive(Subcommand, Debug)]
enum ViewerCommand {
    /// Print schema, CRS, feature count and extent
    Info,
    /// Count the features with an invalid geometry
    Validate,
    /// Write a copy reprojected to another CRS
    Export {
        /// Output shapefile, must not be the input.
        output: PathBuf,
        /// Target CRS, e.g. EPSG:32654.
        #[arg(long)]
        crs: String,
    },
    /// Interactive shell (default)
    Shell,
}

fn try_main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config_filepath.as_deref())?;

    match args.command.unwrap_or(ViewerCommand::Shell) {
        ViewerCommand::Info => print!("{}", describe_shapefile(&args.shapefile)?),
        ViewerCommand::Validate => {
            println!("{}", validation_message(validate_shapefile(&args.shapefile)?))
        }
        ViewerCommand::Export { output, crs } => {
            let summary = export_shapefile(
                &args.shapefile,
                &output,
                &parse_crs(&crs)?,
                &config.write_options(),
            )?;
            println!("{}", summary);
        }
        ViewerCommand::Shell => {
            print!("{}", describe_shapefile(&args.shapefile)?);
            println!("Type 'help' for a list of commands.");
            let mut session = ViewerSession::new(&args.shapefile, config.write_options());
            run_terminal_shell("shp-viewer", &VIEWER_COMMANDS, &mut session)?;
        }
    }
    Ok(())
}

fn main() {
    init_logging();
    if let Err(e) = try_main() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1)
    }
}
