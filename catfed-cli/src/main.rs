//! catfed - command line front end for the catalog federation endpoint
//!
//! Loads a YAML record fixture into an in-memory catalog and runs one
//! manager operation against it.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use catfed_core::config::EndpointConfig;
use catfed_core::managers::PackageFormat;
use catfed_core::query::SortAttribute;

mod endpoint_cli;
mod fixture;

use endpoint_cli::SinkChoice;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "catfed",
    about = "Query, fetch related files and order against a catalog federation endpoint",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Endpoint config file (defaults to the platform config directory)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Override the delivery sink base URL
    #[clap(long, global = true)]
    sink_url: Option<String>,

    /// Write deliveries to this directory instead of the HTTP sink
    #[clap(long, global = true)]
    output_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Count records matching a filter
    Hits {
        /// YAML record fixture
        #[clap(long)]
        fixture: PathBuf,

        /// Filter expression, e.g. "cloudCover < 20 and title like 'harbor%'"
        #[clap(long, default_value = "identifier like '%'")]
        filter: String,
    },

    /// Run a query and list the matching records
    Query {
        #[clap(long)]
        fixture: PathBuf,

        #[clap(long, default_value = "identifier like '%'")]
        filter: String,

        /// Maximum number of results (defaults to query.default_bound)
        #[clap(long)]
        limit: Option<usize>,

        /// Sort key, `attr` or `attr:desc`; repeatable
        #[clap(long, value_parser = endpoint_cli::parse_sort)]
        sort: Vec<SortAttribute>,

        /// Only return these attributes (comma-separated)
        #[clap(long, value_delimiter = ',')]
        attributes: Vec<String>,

        /// Output results as JSON
        #[clap(long)]
        json: bool,
    },

    /// Deliver a record's related files and list them
    Related {
        #[clap(long)]
        fixture: PathBuf,

        /// Record identifier
        #[clap(long)]
        id: String,
    },

    /// Order one or more records as a package
    Order {
        #[clap(long)]
        fixture: PathBuf,

        /// Record identifiers (comma-separated or repeated)
        #[clap(long = "id", value_delimiter = ',', required = true)]
        ids: Vec<String>,

        /// Package format: tar or tar-gz
        #[clap(long)]
        format: Option<PackageFormat>,

        /// Leave related files out of the package
        #[clap(long)]
        no_related: bool,

        #[clap(long)]
        json: bool,
    },

    /// Show the effective endpoint configuration
    Config {
        /// Print the default config file path instead
        #[clap(long)]
        path: bool,
    },
}

fn initialize_tracing(log_level: &LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<EndpointConfig> {
    let mut config = match &cli.config {
        Some(path) => EndpointConfig::load_from_path(path)?,
        None => EndpointConfig::load()?,
    };
    if let Some(url) = &cli.sink_url {
        config.sink.base_url = url.clone();
        config.validate().context("Invalid --sink-url")?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);

    let config = load_config(&cli)?;
    let sink = match &cli.output_dir {
        Some(dir) => SinkChoice::Directory(dir.clone()),
        None => SinkChoice::Http,
    };

    match cli.command {
        Command::Hits { fixture, filter } => {
            let endpoint = endpoint_cli::open_endpoint(&fixture, config, sink)?;
            endpoint_cli::hits_command(&endpoint, filter).await
        }
        Command::Query {
            fixture,
            filter,
            limit,
            sort,
            attributes,
            json,
        } => {
            let endpoint = endpoint_cli::open_endpoint(&fixture, config, sink)?;
            endpoint_cli::query_command(&endpoint, filter, limit, sort, attributes, json).await
        }
        Command::Related { fixture, id } => {
            let endpoint = endpoint_cli::open_endpoint(&fixture, config, sink)?;
            endpoint_cli::related_command(&endpoint, id).await
        }
        Command::Order {
            fixture,
            ids,
            format,
            no_related,
            json,
        } => {
            let endpoint = endpoint_cli::open_endpoint(&fixture, config, sink)?;
            endpoint_cli::order_command(&endpoint, ids, format, no_related, json).await
        }
        Command::Config { path } => {
            if path {
                println!("{}", EndpointConfig::default_config_path()?.display());
            } else {
                print!("{}", config.to_yaml()?);
            }
            Ok(())
        }
    }
}
