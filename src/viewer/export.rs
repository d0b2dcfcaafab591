use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use gdal::spatial_ref::SpatialRef;
use indicatif::ProgressBar;

use crate::crs::crs_utils::display_name;
use crate::crs::reprojection::Reprojector;
use crate::geofile::datastore::DataStore;
use crate::geofile::feature::Feature;
use crate::geofile::schema::Schema;
use crate::geofile::shapefile_writer::{
    ensure_distinct_location, shapefile_output_path, ShapefileTransaction, WriteOptions,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub output_filepath: PathBuf,
    pub features_written: usize,
    pub target_crs: String,
}

impl fmt::Display for ExportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Exported {} features to {:?} in {}",
            self.features_written, self.output_filepath, self.target_crs
        )
    }
}

/// Reproject the shapefile at `source_filepath` into a new shapefile at `output_filepath`.
///
/// The output location is checked against the source before anything is opened for writing.
pub fn export_shapefile(
    source_filepath: &Path,
    output_filepath: &Path,
    target_crs: &SpatialRef,
    options: &WriteOptions,
) -> anyhow::Result<ExportSummary> {
    let output_filepath = shapefile_output_path(output_filepath)?;
    ensure_distinct_location(source_filepath, &output_filepath)?;

    let store = DataStore::open_file(source_filepath)?;
    let mut source = store.single_feature_source()?;
    let schema = source.schema().clone();
    let total = source.feature_count();
    export_features(
        source.features(),
        &schema,
        &output_filepath,
        target_crs,
        options,
        total,
    )
}

/// Copy `features` into a new shapefile, reprojecting every geometry from the schema CRS to
/// `target_crs`. Either every feature is written or no output is left behind.
pub fn export_features<I>(
    features: I,
    schema: &Schema,
    output_filepath: &Path,
    target_crs: &SpatialRef,
    options: &WriteOptions,
    expected_count: u64,
) -> anyhow::Result<ExportSummary>
where
    I: IntoIterator<Item = anyhow::Result<Feature>>,
{
    let source_crs = schema.crs.as_ref().ok_or_else(|| {
        anyhow!(
            "{} has no coordinate reference system, cannot reproject",
            schema.type_name
        )
    })?;
    let reprojector = Reprojector::new(source_crs, target_crs)?;
    log::info!(
        "Exporting {} from {} to {}",
        schema.type_name,
        display_name(source_crs),
        display_name(target_crs)
    );
    if reprojector.is_identity() {
        log::info!("Target CRS matches the source, coordinates are copied unchanged");
    }

    let mut transaction =
        ShapefileTransaction::begin(output_filepath, &schema.retyped(target_crs), options)?;
    let bar = ProgressBar::new(expected_count);
    let copied = copy_features(features, &reprojector, &mut transaction, &bar);
    bar.finish_and_clear();
    if let Err(err) = copied {
        let output_filepath = transaction.output_filepath().to_path_buf();
        if let Err(rollback_err) = transaction.rollback() {
            log::error!("Rollback of {:?} failed: {:#}", output_filepath, rollback_err);
            return Err(err.context(format!("Export to {:?} failed", output_filepath)));
        }
        return Err(err.context(format!("Export to {:?} rolled back", output_filepath)));
    }

    let features_written = transaction.features_written();
    let output_filepath = transaction.commit()?;
    Ok(ExportSummary {
        output_filepath,
        features_written,
        target_crs: display_name(target_crs),
    })
}

fn copy_features<I>(
    features: I,
    reprojector: &Reprojector,
    transaction: &mut ShapefileTransaction,
    bar: &ProgressBar,
) -> anyhow::Result<()>
where
    I: IntoIterator<Item = anyhow::Result<Feature>>,
{
    for feature in features {
        let mut feature = feature?;
        if let Some(geometry) = &feature.geometry {
            let reprojected = reprojector.reproject(geometry).with_context(|| {
                format!("Reprojecting feature {}", feature.fid.unwrap_or_default())
            })?;
            feature.geometry = Some(reprojected);
        }
        transaction.append(&feature)?;
        bar.inc(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use anyhow::anyhow;
    use approx::assert_abs_diff_eq;
    use gdal::vector::{FieldValue, OGRFieldType, OGRwkbGeometryType};
    use testdir::testdir;

    use crate::crs::crs_utils::{display_name, epsg_4326, parse_crs};
    use crate::geofile::datastore::DataStore;
    use crate::geofile::feature::Feature;
    use crate::geofile::schema::{FieldDef, Schema, DEFAULT_GEOMETRY_FIELD};
    use crate::geofile::shapefile_writer::{write_features_to_shapefile, WriteOptions};

    use super::{export_features, export_shapefile};

    fn station_schema() -> Schema {
        Schema {
            type_name: "stations".to_string(),
            geometry_field: DEFAULT_GEOMETRY_FIELD.to_string(),
            geometry_type: OGRwkbGeometryType::wkbPoint,
            fields: vec![
                FieldDef::new("name", OGRFieldType::OFTString).with_width(254),
                FieldDef::new("lines", OGRFieldType::OFTInteger),
            ],
            crs: Some(epsg_4326().unwrap()),
        }
    }

    fn station(x: f64, y: f64, name: &str, lines: i32) -> Feature {
        Feature::new(
            Some(geo::Point::new(x, y).into()),
            vec![
                ("name".to_string(), Some(FieldValue::StringValue(name.to_string()))),
                ("lines".to_string(), Some(FieldValue::IntegerValue(lines))),
            ],
        )
    }

    fn stations() -> Vec<Feature> {
        vec![
            station(139.7895073, 35.6862101, "Bakurocho", 1),
            station(139.7912979, 35.6870132, "Higashi-Nihombashi", 1),
            station(139.7671, 35.6812, "Tokyo", 14),
        ]
    }

    fn write_source(dir: &Path) -> PathBuf {
        write_features_to_shapefile(
            &stations(),
            &dir.join("stations.shp"),
            &station_schema(),
            &WriteOptions::default(),
        )
        .unwrap()
    }

    fn read_features(filepath: &Path) -> Vec<Feature> {
        let store = DataStore::open_file(filepath).unwrap();
        let mut source = store.single_feature_source().unwrap();
        source.features().collect::<anyhow::Result<_>>().unwrap()
    }

    fn point(feature: &Feature) -> geo::Point {
        match feature.geometry {
            Some(geo::Geometry::Point(point)) => point,
            ref other => panic!("Expected a point, got {:?}", other),
        }
    }

    #[test]
    fn test_export_to_same_crs_copies_features() {
        let dir = testdir!();
        let source = write_source(&dir);
        let output = dir.join("stations_copy.shp");

        let summary =
            export_shapefile(&source, &output, &epsg_4326().unwrap(), &WriteOptions::default())
                .unwrap();
        assert_eq!(summary.features_written, 3);
        assert_eq!(summary.output_filepath, output);

        let original = read_features(&source);
        let exported = read_features(&output);
        assert_eq!(original.len(), exported.len());
        for (expected, actual) in original.iter().zip(exported.iter()) {
            assert_eq!(expected.attributes, actual.attributes);
            assert_abs_diff_eq!(point(expected), point(actual), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_export_to_source_location_is_rejected() {
        let dir = testdir!();
        let source = write_source(&dir);
        let shp_before = fs::read(&source).unwrap();
        let dbf_before = fs::read(dir.join("stations.dbf")).unwrap();

        let utm = parse_crs("EPSG:32654").unwrap();
        let err = export_shapefile(&source, &source, &utm, &WriteOptions::default()).unwrap_err();
        assert!(err.to_string().contains("Cannot replace"));
        assert!(
            export_shapefile(&source, &dir.join("stations"), &utm, &WriteOptions::default())
                .is_err()
        );

        assert_eq!(fs::read(&source).unwrap(), shp_before);
        assert_eq!(fs::read(dir.join("stations.dbf")).unwrap(), dbf_before);
    }

    #[test]
    fn test_failure_mid_export_leaves_no_output() {
        let dir = testdir!();
        let output = dir.join("broken.shp");
        let features = vec![
            Ok(station(139.0, 35.0, "First", 1)),
            Ok(station(139.1, 35.1, "Second", 2)),
            Err(anyhow!("Could not read feature 3")),
            Ok(station(139.2, 35.2, "Fourth", 4)),
        ];
        let result = export_features(
            features,
            &station_schema(),
            &output,
            &parse_crs("EPSG:32654").unwrap(),
            &WriteOptions::default(),
            4,
        );
        assert!(result.is_err());
        let leftovers: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains("broken"))
            .collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    #[test]
    fn test_failed_rollback_keeps_the_copy_error() {
        let dir = testdir!();
        let output = dir.join("vanishing.shp");
        let staging_dir = dir.join(format!(".vanishing.{}.staging", std::process::id()));
        let features = (0..3).map(|i| {
            if i == 1 {
                // Rollback can no longer remove the staging directory.
                fs::remove_dir_all(&staging_dir).unwrap();
                return Err(anyhow!("Could not read feature 2"));
            }
            Ok(station(139.0, 35.0, "First", 1))
        });
        let err = export_features(
            features,
            &station_schema(),
            &output,
            &epsg_4326().unwrap(),
            &WriteOptions::default(),
            3,
        )
        .unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Could not read feature 2"), "{}", message);
        assert!(!output.exists());
    }

    #[test]
    fn test_source_without_crs_is_rejected() {
        let dir = testdir!();
        let schema = Schema {
            crs: None,
            ..station_schema()
        };
        let output = dir.join("no_crs.shp");
        let result = export_features(
            stations().into_iter().map(Ok),
            &schema,
            &output,
            &epsg_4326().unwrap(),
            &WriteOptions::default(),
            3,
        );
        assert!(result.is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_export_to_utm() {
        let dir = testdir!();
        let source = write_source(&dir);
        let output = dir.join("stations_utm.shp");
        let utm = parse_crs("EPSG:32654").unwrap();

        let summary = export_shapefile(&source, &output, &utm, &WriteOptions::default()).unwrap();
        assert_eq!(summary.features_written, 3);
        assert_eq!(summary.target_crs, display_name(&utm));

        let store = DataStore::open_file(&output).unwrap();
        let mut exported = store.single_feature_source().unwrap();
        let declared = display_name(exported.schema().crs.as_ref().unwrap())
            .to_lowercase()
            .replace('_', " ");
        assert!(declared.contains("utm zone 54n"), "{}", declared);

        let features: Vec<Feature> = exported.features().collect::<anyhow::Result<_>>().unwrap();
        assert_abs_diff_eq!(
            point(&features[0]),
            geo::Point::new(390467.986, 3949820.494),
            epsilon = 1e-3
        );
        assert_abs_diff_eq!(
            point(&features[1]),
            geo::Point::new(390631.113, 3949907.576),
            epsilon = 1e-3
        );
        assert_eq!(
            features[2].attribute("name"),
            Some(&FieldValue::StringValue("Tokyo".to_string()))
        );
    }
}
