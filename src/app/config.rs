use std::fs::read_to_string;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde::Deserialize;

use crate::geofile::datastore::ConnectionParams;
use crate::geofile::shapefile_writer::WriteOptions;

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const DEFAULT_FILTER: &str = "include";

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    /// Create a `.qix` spatial index for written shapefiles.
    pub spatial_index: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            spatial_index: true,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    pub page_size: usize,
    pub default_filter: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

/// Settings shared by the three programs. Every section is optional.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub export: ExportConfig,
    pub query: QueryConfig,
    pub database: ConnectionParams,
}

impl Config {
    pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        if config.query.page_size == 0 {
            return Err(anyhow!("query.page_size must be at least 1"));
        }
        Ok(config)
    }

    pub fn from_file(config_filepath: &Path) -> anyhow::Result<Self> {
        if !config_filepath.exists() {
            return Err(anyhow!("Config file {} not found", config_filepath.display()));
        }
        let config_contents = read_to_string(config_filepath)?;
        Self::from_yaml(&config_contents)
            .with_context(|| format!("Parsing config file {}", config_filepath.display()))
    }

    /// Read the config file if one was given, defaults otherwise.
    pub fn load(config_filepath: Option<&Path>) -> anyhow::Result<Self> {
        match config_filepath {
            Some(config_filepath) => {
                log::info!("Reading config from {}", config_filepath.display());
                Self::from_file(config_filepath)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            spatial_index: self.export.spatial_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use testdir::testdir;

    use super::{Config, DEFAULT_FILTER, DEFAULT_PAGE_SIZE};

    #[test]
    fn test_defaults() {
        let config = Config::load(None).unwrap();
        assert!(config.export.spatial_index);
        assert_eq!(config.query.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.query.default_filter, DEFAULT_FILTER);
        assert_eq!(config.database.host, None);
    }

    #[test]
    fn test_partial_config() {
        let config = Config::from_yaml(
            "export:\n  spatial_index: false\ndatabase:\n  host: localhost\n  port: 5432\n",
        )
        .unwrap();
        assert!(!config.export.spatial_index);
        assert!(!config.write_options().spatial_index);
        assert_eq!(config.query.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.database.host.as_deref(), Some("localhost"));
        assert_eq!(config.database.port, Some(5432));
    }

    #[test]
    fn test_invalid_page_size() {
        assert!(Config::from_yaml("query:\n  page_size: 0\n").is_err());
        assert!(Config::from_yaml("query:\n  page_size: many\n").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = testdir!();
        let config_filepath = dir.join("geolab.yaml");
        assert!(Config::from_file(&config_filepath).is_err());

        std::fs::write(&config_filepath, "query:\n  page_size: 10\n  default_filter: pop > 5\n")
            .unwrap();
        let config = Config::load(Some(&config_filepath)).unwrap();
        assert_eq!(config.query.page_size, 10);
        assert_eq!(config.query.default_filter, "pop > 5");
    }
}
