use anyhow::{anyhow, Context};
use gdal::spatial_ref::SpatialRef;
use proj::Transform;

use super::crs_utils::{crs_definition, display_name};

/// Coordinate transform applied to feature geometries during export.
///
/// PROJ's `crs_to_crs` operations are lenient: when an exact datum shift is not available (e.g.
/// a missing grid file) it falls back to a ballpark transformation instead of failing.
pub enum Reprojector {
    /// Source and target CRS are equivalent, geometries are passed through unchanged.
    Identity,
    Proj(proj::Proj),
}

impl Reprojector {
    pub fn new(source: &SpatialRef, target: &SpatialRef) -> anyhow::Result<Self> {
        if source == target {
            log::debug!("Source and target CRS are the same, using identity transform");
            return Ok(Reprojector::Identity);
        }
        let projection = proj::Proj::new_known_crs(
            &crs_definition(source)?,
            &crs_definition(target)?,
            None,
        )
        .with_context(|| {
            format!(
                "Finding transform from {} to {}",
                display_name(source),
                display_name(target)
            )
        })?;
        Ok(Reprojector::Proj(projection))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Reprojector::Identity)
    }

    pub fn reproject(&self, geometry: &geo::Geometry) -> anyhow::Result<geo::Geometry> {
        match self {
            Reprojector::Identity => Ok(geometry.clone()),
            Reprojector::Proj(projection) => geometry
                .transformed(projection)
                .map_err(|err| anyhow!("Could not project geometry, {}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::crs::crs_utils::{epsg_4326, parse_crs};

    use super::Reprojector;

    #[test]
    fn test_same_crs_is_identity() {
        let reprojector = Reprojector::new(&epsg_4326().unwrap(), &epsg_4326().unwrap()).unwrap();
        assert!(reprojector.is_identity());

        let polygon: geo::Geometry = geo::Polygon::new(
            vec![(0.5, 0.5), (1.5, 0.5), (1.5, 1.5), (0.5, 0.5)].into(),
            vec![],
        )
        .into();
        assert_eq!(reprojector.reproject(&polygon).unwrap(), polygon);
    }

    #[test]
    fn test_reproject_to_utm() {
        let target_crs = parse_crs("EPSG:32654").unwrap(); // UTM zone 54N
        let reprojector = Reprojector::new(&epsg_4326().unwrap(), &target_crs).unwrap();
        assert!(!reprojector.is_identity());

        // EPSG 4326 coordinates in Tokyo.
        let line: geo::Geometry = geo::LineString::from(vec![
            (139.7895073, 35.6862101),
            (139.7912979, 35.6870132),
        ])
        .into();
        let geo::Geometry::LineString(projected) = reprojector.reproject(&line).unwrap() else {
            panic!("Reprojection changed the geometry type");
        };

        // Computed using https://coordinates-converter.com/
        let expected = geo::LineString::from(vec![
            (390467.986, 3949820.494),
            (390631.113, 3949907.576),
        ]);

        // Millimeter tolerance.
        assert_abs_diff_eq!(projected, expected, epsilon = 1e-3);
    }
}
