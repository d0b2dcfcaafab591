pub mod datastore;
pub mod feature;
pub mod geojson;
pub mod schema;
pub mod shapefile_writer;
