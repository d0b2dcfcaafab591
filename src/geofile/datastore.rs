use std::ffi::CString;
use std::io::{BufRead, Write};
use std::path::Path;
use std::ptr::null;

use anyhow::{anyhow, Context};
use gdal::vector::{Layer, LayerAccess};
use serde::Deserialize;

use super::feature::Feature;
use super::schema::Schema;

/// Parameters of a PostGIS connection. Missing values are asked for on the terminal.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectionParams {
    /// OGR `PG:` connection string.
    pub fn to_connection_string(&self) -> String {
        let mut parts = Vec::new();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value.filter(|value| !value.is_empty()) {
                parts.push(format!("{}={}", key, quote_connection_value(&value)));
            }
        };
        push("host", self.host.clone());
        push("port", self.port.map(|port| port.to_string()));
        push("dbname", self.database.clone());
        push("schemas", self.schema.clone());
        push("user", self.user.clone());
        push("password", self.password.clone());
        format!("PG:{}", parts.join(" "))
    }

    /// Prompt for every parameter that is not set yet. An empty answer leaves it unset, except
    /// for the port which must be a number when given.
    pub fn complete_interactively<R: BufRead, W: Write>(
        &mut self,
        input: &mut R,
        output: &mut W,
    ) -> anyhow::Result<()> {
        if self.host.is_none() {
            self.host = prompt(input, output, "host")?;
        }
        if self.port.is_none() {
            self.port = match prompt(input, output, "port")? {
                Some(port) => Some(
                    port.parse()
                        .with_context(|| format!("Invalid port '{}'", port))?,
                ),
                None => None,
            };
        }
        if self.database.is_none() {
            self.database = prompt(input, output, "database")?;
        }
        if self.schema.is_none() {
            self.schema = prompt(input, output, "schema")?;
        }
        if self.user.is_none() {
            self.user = prompt(input, output, "user")?;
        }
        if self.password.is_none() {
            self.password = prompt(input, output, "password")?;
        }
        Ok(())
    }
}

fn quote_connection_value(value: &str) -> String {
    if value.contains(char::is_whitespace) || value.contains('\'') || value.contains('\\') {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    } else {
        value.to_string()
    }
}

fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    name: &str,
) -> anyhow::Result<Option<String>> {
    write!(output, "{}: ", name)?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    let value = line.trim();
    Ok(if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    })
}

/// An open vector data source: a shapefile, a database or anything else OGR can read.
pub struct DataStore {
    dataset: gdal::Dataset,
    location: String,
}

impl DataStore {
    pub fn open_file(filepath: &Path) -> anyhow::Result<Self> {
        if !filepath.exists() {
            return Err(anyhow!("File {:?} not found", filepath));
        }
        let dataset = open_vector(filepath)
            .with_context(|| format!("Opening {:?}", filepath))?;
        Ok(Self {
            dataset,
            location: filepath.display().to_string(),
        })
    }

    pub fn connect(params: &ConnectionParams) -> anyhow::Result<Self> {
        let connection_string = params.to_connection_string();
        log::info!(
            "Connecting to PostGIS database {:?} on {:?}",
            params.database,
            params.host
        );
        let dataset = open_vector(&connection_string)
            .context("Could not connect, check the connection parameters")?;
        Ok(Self {
            dataset,
            location: format!(
                "PG:{}/{}",
                params.host.as_deref().unwrap_or("localhost"),
                params.database.as_deref().unwrap_or("")
            ),
        })
    }

    /// Open any OGR data source name, e.g. a connection string or a directory of shapefiles.
    pub fn open(data_source_name: &str) -> anyhow::Result<Self> {
        let path = Path::new(data_source_name);
        if path.exists() {
            return Self::open_file(path);
        }
        let dataset = open_vector(data_source_name)
            .with_context(|| format!("Could not open data source '{}'", data_source_name))?;
        Ok(Self {
            dataset,
            location: data_source_name.to_string(),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn type_names(&self) -> Vec<String> {
        self.dataset.layers().map(|layer| layer.name()).collect()
    }

    pub fn feature_source(&self, type_name: &str) -> anyhow::Result<FeatureSource<'_>> {
        let layer = self
            .dataset
            .layer_by_name(type_name)
            .with_context(|| format!("No feature type '{}' in {}", type_name, self.location))?;
        Ok(FeatureSource::new(layer))
    }

    /// The feature source of a single-layer data store such as a shapefile.
    pub fn single_feature_source(&self) -> anyhow::Result<FeatureSource<'_>> {
        let mut layers: Vec<Layer<'_>> = self.dataset.layers().collect();
        if layers.len() != 1 {
            return Err(anyhow!(
                "Found {} layers, only one layer is supported.",
                layers.len()
            ));
        }
        Ok(FeatureSource::new(layers.remove(0)))
    }
}

fn open_vector<P: AsRef<Path>>(data_source_name: P) -> anyhow::Result<gdal::Dataset> {
    gdal::DriverManager::register_all();
    let mut open_options = gdal::DatasetOptions::default();
    open_options.open_flags = gdal::GdalOpenFlags::GDAL_OF_VECTOR;
    Ok(gdal::Dataset::open_ex(data_source_name, open_options)?)
}

/// Read access to one feature type of a data store. Features are streamed from the driver.
pub struct FeatureSource<'a> {
    layer: Layer<'a>,
    schema: Schema,
}

impl<'a> FeatureSource<'a> {
    fn new(layer: Layer<'a>) -> Self {
        let schema = Schema::from_layer(&layer);
        Self { layer, schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Iterate over all features, restarting from the first one.
    pub fn features(&mut self) -> impl Iterator<Item = anyhow::Result<Feature>> + '_ {
        self.layer.features().map(|feature| {
            Feature::from_gdal(&feature).with_context(|| {
                format!("Reading feature {}", feature.fid().unwrap_or_default())
            })
        })
    }

    /// Number of features as reported by the driver, counting them if needed.
    pub fn feature_count(&self) -> u64 {
        self.layer.feature_count()
    }

    /// Bounding box of all features, if the driver can compute one.
    pub fn extent(&self) -> Option<geo::Rect> {
        let envelope = self.layer.get_extent().ok()?;
        Some(geo::Rect::new(
            geo::coord! { x: envelope.MinX, y: envelope.MinY },
            geo::coord! { x: envelope.MaxX, y: envelope.MaxY },
        ))
    }

    /// Ask the driver to skip fetching the listed attributes. Passing an empty list restores
    /// full reads.
    pub fn set_ignored_attributes(&mut self, names: &[String]) -> anyhow::Result<()> {
        let c_names = names
            .iter()
            .map(|name| CString::new(name.as_str()))
            .collect::<Result<Vec<CString>, _>>()?;
        let mut c_pointers: Vec<*const std::os::raw::c_char> =
            c_names.iter().map(|name| name.as_ptr()).collect();
        c_pointers.push(null());
        let result = unsafe {
            if names.is_empty() {
                gdal_sys::OGR_L_SetIgnoredFields(self.layer.c_layer(), std::ptr::null_mut())
            } else {
                gdal_sys::OGR_L_SetIgnoredFields(self.layer.c_layer(), c_pointers.as_mut_ptr())
            }
        };
        if result != gdal_sys::OGRErr::OGRERR_NONE {
            return Err(anyhow!(
                "Driver refused to ignore attributes {:?} (OGR error {})",
                names,
                result
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;
    use testdir::testdir;

    use super::{ConnectionParams, DataStore};

    #[rstest]
    #[case(ConnectionParams::default(), "PG:")]
    #[case(
        ConnectionParams {
            host: Some("localhost".to_string()),
            port: Some(5432),
            database: Some("gis".to_string()),
            schema: Some("public".to_string()),
            user: Some("postgres".to_string()),
            password: Some("secret word".to_string()),
        },
        "PG:host=localhost port=5432 dbname=gis schemas=public user=postgres password='secret word'"
    )]
    fn test_connection_string(#[case] params: ConnectionParams, #[case] expected: &str) {
        assert_eq!(params.to_connection_string(), expected);
    }

    #[test]
    fn test_complete_interactively_only_asks_missing() {
        let mut params = ConnectionParams {
            host: Some("db.example.org".to_string()),
            user: Some("reader".to_string()),
            ..Default::default()
        };
        let mut input = Cursor::new("5433\ngis\n\nhunter2\n");
        let mut output = Vec::new();
        params
            .complete_interactively(&mut input, &mut output)
            .unwrap();

        assert_eq!(params.host.as_deref(), Some("db.example.org"));
        assert_eq!(params.port, Some(5433));
        assert_eq!(params.database.as_deref(), Some("gis"));
        assert_eq!(params.schema, None);
        assert_eq!(params.user.as_deref(), Some("reader"));
        assert_eq!(params.password.as_deref(), Some("hunter2"));
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "port: database: schema: password: "
        );
    }

    #[test]
    fn test_complete_interactively_rejects_bad_port() {
        let mut params = ConnectionParams::default();
        let mut input = Cursor::new("localhost\nfivethousand\n");
        assert!(params
            .complete_interactively(&mut input, &mut Vec::new())
            .is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let missing = testdir!().join("missing.shp");
        assert!(DataStore::open_file(&missing).is_err());
    }
}
