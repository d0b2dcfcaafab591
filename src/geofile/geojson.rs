use std::{fs, path::Path};

use gdal::vector::FieldValue;
use geojson::{JsonObject, JsonValue};

use super::feature::{field_value_to_string, Feature};

fn field_value_to_json(value: &FieldValue) -> JsonValue {
    match value {
        FieldValue::IntegerValue(value) => JsonValue::from(*value),
        FieldValue::Integer64Value(value) => JsonValue::from(*value),
        FieldValue::RealValue(value) => JsonValue::from(*value),
        FieldValue::StringValue(value) => JsonValue::from(value.clone()),
        FieldValue::IntegerListValue(values) => JsonValue::from(values.clone()),
        FieldValue::Integer64ListValue(values) => JsonValue::from(values.clone()),
        FieldValue::RealListValue(values) => JsonValue::from(values.clone()),
        FieldValue::StringListValue(values) => JsonValue::from(values.clone()),
        other => JsonValue::from(field_value_to_string(other)),
    }
}

pub fn feature_to_geojson(feature: &Feature) -> geojson::Feature {
    let properties: JsonObject = feature
        .attributes
        .iter()
        .map(|(name, value)| {
            let value = value.as_ref().map_or(JsonValue::Null, field_value_to_json);
            (name.clone(), value)
        })
        .collect();
    geojson::Feature {
        bbox: None,
        geometry: feature
            .geometry
            .as_ref()
            .map(|geometry| geojson::Geometry::new(geojson::Value::from(geometry))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

pub fn write_features_to_geojson(
    features: &[Feature],
    output_filepath: &Path,
) -> anyhow::Result<()> {
    let feature_collection: geojson::FeatureCollection =
        features.iter().map(feature_to_geojson).collect();
    let geojson_contents: geojson::GeoJson = geojson::GeoJson::from(feature_collection);
    fs::write(output_filepath, geojson_contents.to_string())?;
    log::info!(
        "Wrote {} features to {:?}",
        features.len(),
        output_filepath
    );
    Ok(())
}
