use anyhow::anyhow;
use gdal::vector::FieldValue;

/// One geospatial record: an optional geometry plus the attribute values in schema order.
///
/// Attribute values keep the native OGR field types so that copying a feature from one data
/// source to another is lossless. A `None` value is a null field.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub fid: Option<u64>,
    pub geometry: Option<geo::Geometry>,
    pub attributes: Vec<(String, Option<FieldValue>)>,
}

impl Feature {
    pub fn new(
        geometry: Option<geo::Geometry>,
        attributes: Vec<(String, Option<FieldValue>)>,
    ) -> Self {
        Self {
            fid: None,
            geometry,
            attributes,
        }
    }

    /// Value of the named attribute. Missing and null attributes both yield `None`.
    pub fn attribute(&self, name: &str) -> Option<&FieldValue> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_ref())
    }

    /// Drop every attribute whose name is not in `names`, keeping the original order.
    pub fn retain_attributes(&mut self, names: &[String]) {
        self.attributes.retain(|(key, _)| names.contains(key));
    }

    pub(crate) fn from_gdal(feature: &gdal::vector::Feature) -> anyhow::Result<Self> {
        let geometry = match feature.geometry() {
            Some(geometry) => Some(from_gdal_geometry(geometry)?),
            None => None,
        };
        Ok(Self {
            fid: feature.fid(),
            geometry,
            attributes: feature.fields().collect(),
        })
    }
}

impl From<geo::Geometry> for Feature {
    fn from(value: geo::Geometry) -> Self {
        Self::new(Some(value), Vec::new())
    }
}

pub fn to_gdal_geometry(geometry: &geo::Geometry) -> anyhow::Result<gdal::vector::Geometry> {
    let wkb = wkb::geom_to_wkb(geometry)
        .map_err(|err| anyhow!("Could not write geometry to WKB, {:?}", err))?;
    Ok(gdal::vector::Geometry::from_wkb(&wkb)?)
}

pub fn from_gdal_geometry(geometry: &gdal::vector::Geometry) -> anyhow::Result<geo::Geometry> {
    let wkb = geometry.wkb()?;
    wkb::wkb_to_geom(&mut wkb.as_slice())
        .map_err(|err| anyhow!("Could not read geometry from WKB, {:?}", err))
}

/// Well-known text of a geometry, used for display.
pub fn geometry_to_wkt(geometry: &geo::Geometry) -> anyhow::Result<String> {
    Ok(to_gdal_geometry(geometry)?.wkt()?)
}

/// Parse well-known text through OGR.
pub fn geometry_from_wkt(wkt: &str) -> anyhow::Result<geo::Geometry> {
    let geometry = gdal::vector::Geometry::from_wkt(wkt)
        .map_err(|err| anyhow!("Could not parse WKT '{}', {}", wkt, err))?;
    from_gdal_geometry(&geometry)
}

/// Text rendering of a field value for tables and string comparisons.
pub fn field_value_to_string(value: &FieldValue) -> String {
    match value {
        FieldValue::IntegerValue(value) => value.to_string(),
        FieldValue::Integer64Value(value) => value.to_string(),
        FieldValue::RealValue(value) => value.to_string(),
        FieldValue::StringValue(value) => value.clone(),
        FieldValue::DateValue(value) => value.to_string(),
        FieldValue::DateTimeValue(value) => value.to_rfc3339(),
        FieldValue::IntegerListValue(values) => join_list(values),
        FieldValue::Integer64ListValue(values) => join_list(values),
        FieldValue::RealListValue(values) => join_list(values),
        FieldValue::StringListValue(values) => join_list(values),
        #[allow(unreachable_patterns)]
        other => format!("{:?}", other),
    }
}

fn join_list<T: ToString>(values: &[T]) -> String {
    let items: Vec<String> = values.iter().map(|value| value.to_string()).collect();
    format!("({})", items.join(","))
}

#[cfg(test)]
mod tests {
    use gdal::vector::FieldValue;
    use rstest::rstest;

    use super::{
        field_value_to_string, from_gdal_geometry, geometry_from_wkt, to_gdal_geometry, Feature,
    };

    #[test]
    fn test_gdal_geometry_conversion() {
        let polygon: geo::Geometry = geo::Polygon::new(
            vec![(0.0, 0.0), (4.0, 0.0), (4.0, 3.0), (0.0, 0.0)].into(),
            vec![],
        )
        .into();
        let gdal_geometry = to_gdal_geometry(&polygon).unwrap();
        assert_eq!(from_gdal_geometry(&gdal_geometry).unwrap(), polygon);
    }

    #[test]
    fn test_geometry_from_wkt() {
        let geometry = geometry_from_wkt("POINT (10 20)").unwrap();
        assert_eq!(geometry, geo::Geometry::Point(geo::Point::new(10.0, 20.0)));
        assert!(geometry_from_wkt("POINT (10").is_err());
    }

    #[test]
    fn test_attribute_lookup() {
        let mut feature = Feature::new(
            None,
            vec![
                ("name".to_string(), Some(FieldValue::StringValue("a".to_string()))),
                ("number".to_string(), None),
                ("area".to_string(), Some(FieldValue::RealValue(2.5))),
            ],
        );
        assert_eq!(
            feature.attribute("name"),
            Some(&FieldValue::StringValue("a".to_string()))
        );
        assert_eq!(feature.attribute("number"), None);
        assert_eq!(feature.attribute("missing"), None);

        feature.retain_attributes(&["area".to_string()]);
        assert_eq!(feature.attributes.len(), 1);
        assert_eq!(feature.attribute("area"), Some(&FieldValue::RealValue(2.5)));
    }

    #[rstest]
    #[case(FieldValue::IntegerValue(42), "42")]
    #[case(FieldValue::Integer64Value(-7), "-7")]
    #[case(FieldValue::RealValue(1.5), "1.5")]
    #[case(FieldValue::StringValue("Tokyo".to_string()), "Tokyo")]
    #[case(FieldValue::IntegerListValue(vec![1, 2]), "(1,2)")]
    fn test_field_value_to_string(#[case] value: FieldValue, #[case] expected: &str) {
        assert_eq!(field_value_to_string(&value), expected);
    }
}
