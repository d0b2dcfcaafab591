use std::path::Path;

use anyhow::anyhow;

use crate::app::commands::{Command, Console};
use crate::app::config::Config;
use crate::cql::{compile, Filter};
use crate::geofile::datastore::{ConnectionParams, DataStore, FeatureSource};
use crate::geofile::feature::Feature;
use crate::geofile::geojson::write_features_to_geojson;

use super::query::{count_features, select_features, select_geometries};
use super::table::{render_geometries, render_page};

/// State of the query shell.
pub struct QuerySession {
    store: Option<DataStore>,
    type_name: Option<String>,
    filter_text: String,
    filter: Filter,
    page_size: usize,
    database: ConnectionParams,
    /// Features of the last `features` or `geometry` query, `None` until one has run.
    last_results: Option<Vec<Feature>>,
}

impl QuerySession {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            store: None,
            type_name: None,
            filter: compile(&config.query.default_filter)?,
            filter_text: config.query.default_filter.clone(),
            page_size: config.query.page_size,
            database: config.database.clone(),
            last_results: None,
        })
    }

    /// Replace the data store, selecting its feature type when there is only one.
    pub fn attach(&mut self, store: DataStore) -> Vec<String> {
        let type_names = store.type_names();
        self.type_name = match type_names.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };
        log::info!("Opened {} with {} feature types", store.location(), type_names.len());
        self.store = Some(store);
        self.last_results = None;
        type_names
    }

    pub fn select_type(&mut self, type_name: &str) -> anyhow::Result<()> {
        let store = self.store()?;
        if !store.type_names().iter().any(|name| name == type_name) {
            return Err(anyhow!(
                "No feature type '{}' in {}, available: {}",
                type_name,
                store.location(),
                store.type_names().join(", ")
            ));
        }
        self.type_name = Some(type_name.to_string());
        Ok(())
    }

    /// Compile and keep a new filter. A malformed filter leaves the current one in place.
    pub fn set_filter(&mut self, text: &str) -> anyhow::Result<()> {
        self.filter = compile(text)?;
        self.filter_text = text.to_string();
        Ok(())
    }

    pub fn filter_text(&self) -> &str {
        &self.filter_text
    }

    pub fn last_results(&self) -> Option<&[Feature]> {
        self.last_results.as_deref()
    }

    fn store(&self) -> anyhow::Result<&DataStore> {
        self.store
            .as_ref()
            .ok_or_else(|| anyhow!("No data store, use 'open', 'connect' or 'datastore' first"))
    }

    fn feature_source(&self) -> anyhow::Result<FeatureSource<'_>> {
        let store = self.store()?;
        let type_name = self
            .type_name
            .as_deref()
            .ok_or_else(|| anyhow!("No feature type selected, list them with 'types'"))?;
        store.feature_source(type_name)
    }
}

fn write_type_names(type_names: &[String], console: &mut Console) -> anyhow::Result<()> {
    for type_name in type_names {
        writeln!(console.output, "  {}", type_name)?;
    }
    Ok(())
}

fn open(session: &mut QuerySession, args: &str, console: &mut Console) -> anyhow::Result<()> {
    if args.is_empty() {
        return Err(anyhow!("Usage: open <shapefile>"));
    }
    let type_names = session.attach(DataStore::open_file(Path::new(args))?);
    write_type_names(&type_names, console)
}

fn connect(session: &mut QuerySession, _args: &str, console: &mut Console) -> anyhow::Result<()> {
    let mut params = session.database.clone();
    params.complete_interactively(&mut console.input, &mut console.output)?;
    let type_names = session.attach(DataStore::connect(&params)?);
    session.database = params;
    write_type_names(&type_names, console)
}

fn datastore(session: &mut QuerySession, args: &str, console: &mut Console) -> anyhow::Result<()> {
    if args.is_empty() {
        return Err(anyhow!("Usage: datastore <connection string>"));
    }
    let type_names = session.attach(DataStore::open(args)?);
    write_type_names(&type_names, console)
}

fn types(session: &mut QuerySession, _args: &str, console: &mut Console) -> anyhow::Result<()> {
    let store = session.store()?;
    for type_name in store.type_names() {
        let marker = if session.type_name.as_deref() == Some(type_name.as_str()) {
            "*"
        } else {
            " "
        };
        writeln!(console.output, "{} {}", marker, type_name)?;
    }
    Ok(())
}

fn use_type(session: &mut QuerySession, args: &str, console: &mut Console) -> anyhow::Result<()> {
    if args.is_empty() {
        return Err(anyhow!("Usage: use <type name>"));
    }
    session.select_type(args)?;
    let source = session.feature_source()?;
    write!(console.output, "{}", source.schema())?;
    Ok(())
}

fn filter(session: &mut QuerySession, args: &str, console: &mut Console) -> anyhow::Result<()> {
    if !args.is_empty() {
        session.set_filter(args)?;
    }
    writeln!(console.output, "Filter: {}", session.filter_text())?;
    Ok(())
}

fn features(session: &mut QuerySession, args: &str, console: &mut Console) -> anyhow::Result<()> {
    let page = if args.is_empty() {
        1
    } else {
        args.parse()
            .map_err(|_| anyhow!("Page must be a positive number, got '{}'", args))?
    };
    let mut source = session.feature_source()?;
    let result = select_features(&mut source, &session.filter, page, session.page_size)?;
    write!(console.output, "{}", render_page(&result))?;
    drop(source);
    session.last_results = Some(result.features);
    Ok(())
}

fn count(session: &mut QuerySession, _args: &str, console: &mut Console) -> anyhow::Result<()> {
    let mut source = session.feature_source()?;
    let count = count_features(&mut source, &session.filter)?;
    writeln!(console.output, "Count: {}", count)?;
    Ok(())
}

fn geometry(session: &mut QuerySession, _args: &str, console: &mut Console) -> anyhow::Result<()> {
    let mut source = session.feature_source()?;
    let geometries = select_geometries(&mut source, &session.filter)?;
    write!(console.output, "{}", render_geometries(&geometries))?;
    drop(source);
    session.last_results = Some(geometries);
    Ok(())
}

fn save(session: &mut QuerySession, args: &str, console: &mut Console) -> anyhow::Result<()> {
    if args.is_empty() {
        return Err(anyhow!("Usage: save <output.geojson>"));
    }
    let results = session
        .last_results()
        .ok_or_else(|| anyhow!("Nothing to save, run 'features' or 'geometry' first"))?;
    write_features_to_geojson(results, Path::new(args))?;
    writeln!(console.output, "Saved {} features to {}", results.len(), args)?;
    Ok(())
}

pub const QUERY_COMMANDS: [Command<QuerySession>; 10] = [
    Command {
        name: "open",
        usage: "open <shapefile>",
        help: "Open a shapefile or other OGR readable file",
        handler: open,
    },
    Command {
        name: "connect",
        usage: "connect",
        help: "Connect to PostGIS, asking for missing connection parameters",
        handler: connect,
    },
    Command {
        name: "datastore",
        usage: "datastore <connection>",
        help: "Open any OGR data source name or connection string",
        handler: datastore,
    },
    Command {
        name: "types",
        usage: "types",
        help: "List the feature types of the data store",
        handler: types,
    },
    Command {
        name: "use",
        usage: "use <type name>",
        help: "Select the feature type to query and show its schema",
        handler: use_type,
    },
    Command {
        name: "filter",
        usage: "filter [CQL]",
        help: "Show or set the filter, e.g. filter POP_RANK >= 5",
        handler: filter,
    },
    Command {
        name: "features",
        usage: "features [page]",
        help: "Show a page of the features matching the filter",
        handler: features,
    },
    Command {
        name: "count",
        usage: "count",
        help: "Count the features matching the filter",
        handler: count,
    },
    Command {
        name: "geometry",
        usage: "geometry",
        help: "Show only the geometry of the matching features",
        handler: geometry,
    },
    Command {
        name: "save",
        usage: "save <output.geojson>",
        help: "Write the last results to a GeoJSON file",
        handler: save,
    },
];
