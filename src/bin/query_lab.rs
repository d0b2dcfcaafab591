use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use geolab::app::commands::{dispatch, Console};
use geolab::app::config::Config;
use geolab::app::init_logging;
use geolab::app::terminal::run_terminal_shell;
use geolab::geofile::datastore::DataStore;
use geolab::query::session::{QuerySession, QUERY_COMMANDS};

/// Query the features of a shapefile, PostGIS database or other OGR data source with CQL.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long)]
    config_filepath: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<QueryCommand>,
}

#[derive(Args, Debug)]
struct Target {
    /// File or OGR connection string to read from.
    source: String,

    /// Feature type to query, required when the source has several.
    #[arg(short, long)]
    type_name: Option<String>,

    /// CQL filter.
    #[arg(short, long)]
    filter: Option<String>,
}

#[derive(Subcommand, Debug)]
enum QueryCommand {
    /// Print a page of the matching features
    Features {
        #[command(flatten)]
        target: Target,

        /// Page number, starting at 1.
        #[arg(short, long, default_value_t = 1)]
        page: usize,

        /// Also write the page to a GeoJSON file.
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Print the number of matching features
    Count {
        #[command(flatten)]
        target: Target,
    },
    /// Print only the geometries of the matching features
    Geometry {
        #[command(flatten)]
        target: Target,

        /// Also write the geometries to a GeoJSON file.
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Interactive shell (default)
    Shell,
}

fn prepare(session: &mut QuerySession, target: &Target) -> anyhow::Result<()> {
    session.attach(DataStore::open(&target.source)?);
    if let Some(type_name) = &target.type_name {
        session.select_type(type_name)?;
    }
    if let Some(filter) = &target.filter {
        session.set_filter(filter)?;
    }
    Ok(())
}

fn try_main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = Config::load(args.config_filepath.as_deref())?;
    let mut session = QuerySession::new(&config)?;

    let (target, lines) = match args.command.unwrap_or(QueryCommand::Shell) {
        QueryCommand::Shell => {
            println!("Type 'help' for a list of commands.");
            return run_terminal_shell("query-lab", &QUERY_COMMANDS, &mut session);
        }
        QueryCommand::Features { target, page, save } => {
            let mut lines = vec![format!("features {}", page)];
            lines.extend(save.map(|path| format!("save {}", path.display())));
            (target, lines)
        }
        QueryCommand::Count { target } => (target, vec!["count".to_string()]),
        QueryCommand::Geometry { target, save } => {
            let mut lines = vec!["geometry".to_string()];
            lines.extend(save.map(|path| format!("save {}", path.display())));
            (target, lines)
        }
    };
    prepare(&mut session, &target)?;
    let mut input = std::io::stdin().lock();
    let mut output = std::io::stdout();
    let mut console = Console {
        input: &mut input,
        output: &mut output,
    };
    for line in lines {
        dispatch(&QUERY_COMMANDS, &mut session, &line, &mut console)?;
    }
    Ok(())
}

fn main() {
    init_logging();
    if let Err(e) = try_main() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1)
    }
}
