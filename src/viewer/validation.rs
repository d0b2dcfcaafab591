use anyhow::Context;

use crate::geofile::feature::{to_gdal_geometry, Feature};

/// OGC simple feature validity, evaluated by GEOS through OGR.
pub fn is_valid_geometry(geometry: &geo::Geometry) -> anyhow::Result<bool> {
    let gdal_geometry = to_gdal_geometry(geometry)?;
    let valid = unsafe { gdal_sys::OGR_G_IsValid(gdal_geometry.c_geometry()) };
    Ok(valid != 0)
}

/// Count the features whose geometry is not valid. Features without geometry are skipped.
pub fn count_invalid_geometries<I>(features: I) -> anyhow::Result<usize>
where
    I: IntoIterator<Item = anyhow::Result<Feature>>,
{
    let mut invalid = 0;
    let mut checked = 0;
    for feature in features {
        let feature = feature?;
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        checked += 1;
        let valid = is_valid_geometry(geometry).with_context(|| {
            format!("Validating feature {}", feature.fid.unwrap_or_default())
        })?;
        if !valid {
            log::info!("Invalid geometry in feature {:?}", feature.fid);
            invalid += 1;
        }
    }
    log::debug!("Checked {} geometries, {} invalid", checked, invalid);
    Ok(invalid)
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use rstest::rstest;

    use crate::geofile::feature::{geometry_from_wkt, Feature};

    use super::{count_invalid_geometries, is_valid_geometry};

    fn feature(wkt: &str) -> anyhow::Result<Feature> {
        Ok(Feature::from(geometry_from_wkt(wkt)?))
    }

    #[rstest]
    #[case("POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))", true)]
    #[case("POLYGON ((0 0, 1 1, 1 0, 0 1, 0 0))", false)]
    #[case("LINESTRING (0 0, 1 1)", true)]
    #[case("POINT (3 4)", true)]
    fn test_is_valid_geometry(#[case] wkt: &str, #[case] expected: bool) {
        let geometry = geometry_from_wkt(wkt).unwrap();
        assert_eq!(is_valid_geometry(&geometry).unwrap(), expected);
    }

    #[test]
    fn test_counts_self_intersecting_polygons() {
        let features = vec![
            feature("POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))"),
            feature("POLYGON ((0 0, 2 2, 2 0, 0 2, 0 0))"),
            feature("POLYGON ((10 10, 11 11, 11 10, 10 11, 10 10))"),
            feature("POINT (1 1)"),
        ];
        assert_eq!(count_invalid_geometries(features).unwrap(), 2);
    }

    #[test]
    fn test_empty_collection() {
        assert_eq!(count_invalid_geometries(Vec::<anyhow::Result<Feature>>::new()).unwrap(), 0);
    }

    #[test]
    fn test_null_geometries_are_skipped() {
        let features = vec![Ok(Feature::new(None, vec![])), Ok(Feature::new(None, vec![]))];
        assert_eq!(count_invalid_geometries(features).unwrap(), 0);
    }

    #[test]
    fn test_read_error_is_propagated() {
        let features = vec![
            feature("POINT (1 1)"),
            Err(anyhow!("Corrupt record")),
        ];
        assert!(count_invalid_geometries(features).is_err());
    }
}
