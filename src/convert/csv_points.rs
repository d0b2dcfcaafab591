use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use gdal::vector::{FieldValue, OGRFieldType, OGRwkbGeometryType};

use crate::crs::crs_utils::epsg_4326;
use crate::geofile::feature::Feature;
use crate::geofile::schema::{FieldDef, Schema, DEFAULT_GEOMETRY_FIELD};
use crate::geofile::shapefile_writer::{
    ensure_distinct_location, is_shapefile_sidecar, shapefile_output_path,
    write_features_to_shapefile, WriteOptions,
};

pub const LOCATION_TYPE_NAME: &str = "Location";
const NAME_WIDTH: i32 = 254;
const COLUMN_COUNT: usize = 4;

/// One CSV row: `latitude,longitude,name,number`.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
    pub number: i32,
}

impl Location {
    pub fn to_feature(&self) -> Feature {
        Feature::new(
            Some(geo::Point::new(self.longitude, self.latitude).into()),
            vec![
                ("name".to_string(), Some(FieldValue::StringValue(self.name.clone()))),
                ("number".to_string(), Some(FieldValue::IntegerValue(self.number))),
            ],
        )
    }
}

/// Point feature type written by the converter, in WGS84.
pub fn location_schema() -> anyhow::Result<Schema> {
    Ok(Schema {
        type_name: LOCATION_TYPE_NAME.to_string(),
        geometry_field: DEFAULT_GEOMETRY_FIELD.to_string(),
        geometry_type: OGRwkbGeometryType::wkbPoint,
        fields: vec![
            FieldDef::new("name", OGRFieldType::OFTString).with_width(NAME_WIDTH),
            FieldDef::new("number", OGRFieldType::OFTInteger),
        ],
        crs: Some(epsg_4326()?),
    })
}

fn parse_field<T: std::str::FromStr>(value: &str, column: &str, line: u64) -> anyhow::Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("Line {}: {} '{}' is not a valid number", line, column, value))
}

/// Parse every location of a CSV document. The first line is a header, blank lines are skipped,
/// any malformed row fails the whole read.
pub fn read_locations<R: Read>(reader: R) -> anyhow::Result<Vec<Location>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let header = csv_reader.headers().context("Failed to read CSV header")?;
    log::info!("Header: {}", header.iter().collect::<Vec<_>>().join(","));

    let mut locations = Vec::new();
    for record in csv_reader.records() {
        let record = record.context("Failed to read CSV record")?;
        let line = record.position().map_or(0, |position| position.line());
        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() < COLUMN_COUNT {
            return Err(anyhow!(
                "Line {}: expected {} fields (latitude, longitude, name, number), found {}",
                line,
                COLUMN_COUNT,
                record.len()
            ));
        }
        let location = Location {
            latitude: parse_field(&record[0], "latitude", line)?,
            longitude: parse_field(&record[1], "longitude", line)?,
            name: record[2].to_string(),
            number: parse_field(&record[3], "number", line)?,
        };
        log::debug!("Line {}: {:?}", line, location);
        locations.push(location);
    }
    Ok(locations)
}

pub fn read_locations_from_file(csv_filepath: &Path) -> anyhow::Result<Vec<Location>> {
    let file = File::open(csv_filepath)
        .with_context(|| format!("Failed to open CSV file {:?}", csv_filepath))?;
    read_locations(file).with_context(|| format!("Reading {:?}", csv_filepath))
}

/// Shapefile path used when no output is given: the input with a `.shp` extension.
pub fn default_output_path(csv_filepath: &Path) -> PathBuf {
    csv_filepath.with_extension("shp")
}

/// Convert a location CSV into a new point shapefile and return the path written.
pub fn csv_to_shapefile(
    csv_filepath: &Path,
    output_filepath: Option<&Path>,
    options: &WriteOptions,
) -> anyhow::Result<PathBuf> {
    let output_filepath = match output_filepath {
        Some(output_filepath) => shapefile_output_path(output_filepath)?,
        None => default_output_path(csv_filepath),
    };
    // Committing a shapefile replaces every sidecar sharing its stem.
    if is_shapefile_sidecar(csv_filepath) {
        ensure_distinct_location(csv_filepath, &output_filepath)?;
    }

    let locations = read_locations_from_file(csv_filepath)?;
    log::info!("Read {} locations from {:?}", locations.len(), csv_filepath);
    let features: Vec<Feature> = locations.iter().map(Location::to_feature).collect();
    write_features_to_shapefile(&features, &output_filepath, &location_schema()?, options)
}
