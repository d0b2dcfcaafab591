extern crate log;
pub mod app;
pub mod convert;
pub mod cql;
pub mod crs;
pub mod geofile;
pub mod query;
pub mod viewer;
