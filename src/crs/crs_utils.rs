use anyhow::{anyhow, Context};
use gdal::spatial_ref::SpatialRef;

pub type EpsgCode = u32;

/// Geographic WGS84, the CRS of every shapefile written from CSV input.
pub const WGS84_EPSG: EpsgCode = 4326;

pub fn epsg_4326() -> anyhow::Result<SpatialRef> {
    SpatialRef::from_epsg(WGS84_EPSG).context("Creating WGS84 spatial ref")
}

/// Parse a user supplied CRS definition.
///
/// Accepts anything OSR understands through `SetFromUserInput`: authority strings such as
/// "EPSG:32654", OGC URNs, WKT and PROJ strings. A bare number is taken as an EPSG code.
pub fn parse_crs(definition: &str) -> anyhow::Result<SpatialRef> {
    let definition = definition.trim();
    if definition.is_empty() {
        return Err(anyhow!("Empty CRS definition"));
    }
    if let Ok(code) = definition.parse::<EpsgCode>() {
        return SpatialRef::from_epsg(code)
            .map_err(|err| anyhow!("Could not create SpatialRef from EPSG code {}. {}", code, err));
    }
    SpatialRef::from_definition(definition)
        .map_err(|err| anyhow!("Could not parse CRS definition '{}'. {}", definition, err))
}

/// Definition string handed to PROJ for the given spatial ref.
///
/// Prefers the authority code, which PROJ resolves from its own database. Spatial refs read from
/// `.prj` files often carry no authority, in which case the WKT is passed through.
pub fn crs_definition(spatial_ref: &SpatialRef) -> anyhow::Result<String> {
    if let (Ok(auth_name), Ok(auth_code)) = (spatial_ref.auth_name(), spatial_ref.auth_code()) {
        if !auth_name.is_empty() {
            return Ok(format!("{}:{}", auth_name, auth_code));
        }
    }
    spatial_ref
        .to_wkt()
        .map_err(|err| anyhow!("Could not export CRS to WKT, {}", err))
}

/// Human readable name of a spatial ref, falling back to its definition.
pub fn display_name(spatial_ref: &SpatialRef) -> String {
    match spatial_ref.name() {
        Ok(name) if !name.is_empty() => match (spatial_ref.auth_name(), spatial_ref.auth_code()) {
            (Ok(auth_name), Ok(auth_code)) if !auth_name.is_empty() => {
                format!("{} ({}:{})", name, auth_name, auth_code)
            }
            _ => name,
        },
        _ => crs_definition(spatial_ref).unwrap_or_else(|_| "<unknown CRS>".to_string()),
    }
}
