use std::path::{Path, PathBuf};

use anyhow::anyhow;
use gdal::spatial_ref::SpatialRef;

use crate::app::commands::{Command, Console};
use crate::crs::crs_utils::{display_name, parse_crs};
use crate::geofile::shapefile_writer::WriteOptions;

use super::export::export_shapefile;
use super::{describe_shapefile, validate_shapefile, validation_message};

/// State of the viewer shell: the shapefile on display and the CRS exports are written in.
pub struct ViewerSession {
    pub source_filepath: PathBuf,
    pub target_crs: Option<SpatialRef>,
    pub write_options: WriteOptions,
}

impl ViewerSession {
    pub fn new(source_filepath: &Path, write_options: WriteOptions) -> Self {
        Self {
            source_filepath: source_filepath.to_path_buf(),
            target_crs: None,
            write_options,
        }
    }
}

fn info(session: &mut ViewerSession, _args: &str, console: &mut Console) -> anyhow::Result<()> {
    write!(console.output, "{}", describe_shapefile(&session.source_filepath)?)?;
    if let Some(target_crs) = &session.target_crs {
        writeln!(console.output, "Export CRS: {}", display_name(target_crs))?;
    }
    Ok(())
}

fn validate(session: &mut ViewerSession, _args: &str, console: &mut Console) -> anyhow::Result<()> {
    let invalid = validate_shapefile(&session.source_filepath)?;
    writeln!(console.output, "{}", validation_message(invalid))?;
    Ok(())
}

fn set_crs(session: &mut ViewerSession, args: &str, console: &mut Console) -> anyhow::Result<()> {
    if args.is_empty() {
        return Err(anyhow!("Usage: crs <definition>, e.g. crs EPSG:32654"));
    }
    let target_crs = parse_crs(args)?;
    writeln!(console.output, "Export CRS: {}", display_name(&target_crs))?;
    session.target_crs = Some(target_crs);
    Ok(())
}

fn export(session: &mut ViewerSession, args: &str, console: &mut Console) -> anyhow::Result<()> {
    if args.is_empty() {
        return Err(anyhow!("Usage: export <output.shp>"));
    }
    let target_crs = session
        .target_crs
        .as_ref()
        .ok_or_else(|| anyhow!("No export CRS selected, set one with 'crs <definition>'"))?;
    let summary = export_shapefile(
        &session.source_filepath,
        Path::new(args),
        target_crs,
        &session.write_options,
    )?;
    writeln!(console.output, "{}", summary)?;
    Ok(())
}

pub const VIEWER_COMMANDS: [Command<ViewerSession>; 4] = [
    Command {
        name: "info",
        usage: "info",
        help: "Describe the shapefile: schema, CRS, feature count and extent",
        handler: info,
    },
    Command {
        name: "validate",
        usage: "validate",
        help: "Check every feature geometry for validity",
        handler: validate,
    },
    Command {
        name: "crs",
        usage: "crs <definition>",
        help: "Select the CRS used for exports (EPSG code, authority string, WKT, PROJ)",
        handler: set_crs,
    },
    Command {
        name: "export",
        usage: "export <output.shp>",
        help: "Write a copy of the shapefile reprojected to the selected CRS",
        handler: export,
    },
];
