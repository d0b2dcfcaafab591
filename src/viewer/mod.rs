pub mod export;
pub mod session;
pub mod validation;

use std::fmt::Write;
use std::path::Path;

use crate::geofile::datastore::DataStore;

/// Text shown in place of a map: schema, feature count and extent of a shapefile.
pub fn describe_shapefile(filepath: &Path) -> anyhow::Result<String> {
    let store = DataStore::open_file(filepath)?;
    let source = store.single_feature_source()?;
    let mut description = format!("Shapefile: {}\n", store.location());
    write!(description, "{}", source.schema())?;
    writeln!(description, "Features: {}", source.feature_count())?;
    match source.extent() {
        Some(extent) => writeln!(
            description,
            "Extent: ({}, {}) - ({}, {})",
            extent.min().x,
            extent.min().y,
            extent.max().x,
            extent.max().y
        )?,
        None => writeln!(description, "Extent: <empty>")?,
    }
    Ok(description)
}

/// Count invalid geometries in a shapefile.
pub fn validate_shapefile(filepath: &Path) -> anyhow::Result<usize> {
    let store = DataStore::open_file(filepath)?;
    let mut source = store.single_feature_source()?;
    log::info!(
        "Validating {} features of {}",
        source.feature_count(),
        store.location()
    );
    validation::count_invalid_geometries(source.features())
}

pub fn validation_message(invalid: usize) -> String {
    if invalid == 0 {
        "All feature geometries are valid".to_string()
    } else {
        format!("Invalid geometries: {}", invalid)
    }
}

#[cfg(test)]
mod tests {
    use gdal::vector::{OGRFieldType, OGRwkbGeometryType};
    use rstest::rstest;
    use testdir::testdir;

    use crate::crs::crs_utils::epsg_4326;
    use crate::geofile::feature::{geometry_from_wkt, Feature};
    use crate::geofile::schema::{FieldDef, Schema, DEFAULT_GEOMETRY_FIELD};
    use crate::geofile::shapefile_writer::{write_features_to_shapefile, WriteOptions};

    use super::{describe_shapefile, validate_shapefile, validation_message};

    #[rstest]
    #[case(0, "All feature geometries are valid")]
    #[case(3, "Invalid geometries: 3")]
    fn test_validation_message(#[case] invalid: usize, #[case] expected: &str) {
        assert_eq!(validation_message(invalid), expected);
    }

    #[test]
    fn test_validate_and_describe_shapefile() {
        let dir = testdir!();
        let schema = Schema {
            type_name: "parcels".to_string(),
            geometry_field: DEFAULT_GEOMETRY_FIELD.to_string(),
            geometry_type: OGRwkbGeometryType::wkbPolygon,
            fields: vec![FieldDef::new("owner", OGRFieldType::OFTString).with_width(40)],
            crs: Some(epsg_4326().unwrap()),
        };
        let features: Vec<Feature> = [
            "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))",
            "POLYGON ((2 2, 3 3, 3 2, 2 3, 2 2))",
        ]
        .iter()
        .map(|wkt| Feature::from(geometry_from_wkt(wkt).unwrap()))
        .collect();
        let filepath = dir.join("parcels.shp");
        write_features_to_shapefile(&features, &filepath, &schema, &WriteOptions::default())
            .unwrap();

        assert_eq!(validate_shapefile(&filepath).unwrap(), 1);
        let description = describe_shapefile(&filepath).unwrap();
        assert!(description.contains("Features: 2"), "{}", description);
        assert!(description.contains("owner"), "{}", description);
        assert!(description.contains("Extent: (0, 0) - (3, 3)"), "{}", description);
    }
}
