//! Manager commands: hits, query, related and order

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use catfed_core::catalog::InMemoryCatalog;
use catfed_core::config::EndpointConfig;
use catfed_core::dag::{AttributeKey, ResultGraph};
use catfed_core::delivery::{DeliverySink, Upload};
use catfed_core::managers::{OrderRequest, PackageFormat};
use catfed_core::query::{Query, QueryBound, SortAttribute, SubmitOptions};
use catfed_core::Endpoint;

use crate::fixture::Fixture;

/// Writes deliveries into a local directory instead of an HTTP sink
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl DeliverySink for DirectorySink {
    async fn put(&self, upload: &Upload) -> Result<()> {
        let path = self.dir.join(&upload.filename);
        std::fs::write(&path, &upload.body)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    fn location(&self, filename: &str) -> String {
        self.dir.join(filename).display().to_string()
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}

/// Where the CLI sends derived files
pub enum SinkChoice {
    Http,
    Directory(PathBuf),
}

/// Build an endpoint over the records in `fixture`
pub fn open_endpoint(fixture: &Path, config: EndpointConfig, sink: SinkChoice) -> Result<Endpoint> {
    let catalog = Arc::new(InMemoryCatalog::new());
    let base_dir = fixture.parent().unwrap_or_else(|| Path::new("."));
    Fixture::load(fixture)?.ingest_into(&catalog, base_dir)?;

    match sink {
        SinkChoice::Http => Endpoint::from_config(catalog, config),
        SinkChoice::Directory(dir) => {
            let sink = Arc::new(DirectorySink::new(dir)?);
            Ok(Endpoint::new(catalog, sink, config))
        }
    }
}

pub async fn hits_command(endpoint: &Endpoint, filter: String) -> Result<()> {
    let count = endpoint.catalog_mgr().hit_count(&Query::new(filter)).await?;
    println!("{count}");
    Ok(())
}

/// Table row for query results
#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "Identifier")]
    identifier: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Content Type")]
    content_type: String,
    #[tabled(rename = "Related Files")]
    related: String,
}

impl GraphRow {
    fn from_graph(graph: &ResultGraph) -> Self {
        let text = |name: &str| {
            graph
                .attribute(name)
                .map(|v| v.as_text())
                .unwrap_or_default()
        };
        Self {
            identifier: graph.identifier().to_string(),
            status: graph.status().to_string(),
            title: text("title"),
            content_type: text("contentType"),
            related: graph
                .related_files()
                .iter()
                .map(|r| r.filename.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// `key` or `key:desc`
pub fn parse_sort(arg: &str) -> Result<SortAttribute, String> {
    match arg.rsplit_once(':') {
        Some((key, "asc")) => Ok(SortAttribute::ascending(AttributeKey::from(key))),
        Some((key, "desc")) => Ok(SortAttribute::descending(AttributeKey::from(key))),
        Some((_, other)) => Err(format!("Unknown sort direction '{other}' (expected asc or desc)")),
        None => Ok(SortAttribute::ascending(AttributeKey::from(arg))),
    }
}

pub async fn query_command(
    endpoint: &Endpoint,
    filter: String,
    limit: Option<usize>,
    sort: Vec<SortAttribute>,
    attributes: Vec<String>,
    json_output: bool,
) -> Result<()> {
    let catalog = endpoint.catalog_mgr();
    let bound = match limit {
        Some(n) => QueryBound::AtMost(n),
        None => catalog.default_bound(),
    };
    let mut options = SubmitOptions::bounded(bound);
    options.sort = sort;
    if !attributes.is_empty() {
        options = options.with_attributes(attributes.into_iter().map(AttributeKey::from).collect());
    }

    let graphs = catalog.submit_query_with(&Query::new(filter), &options).await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&graphs)?);
        return Ok(());
    }
    if graphs.is_empty() {
        println!("No records matched.");
        return Ok(());
    }

    let rows: Vec<GraphRow> = graphs.iter().map(GraphRow::from_graph).collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
    println!("{} record(s)", graphs.len());
    Ok(())
}

async fn graph_for(endpoint: &Endpoint, id: &str) -> Result<ResultGraph> {
    let filter = format!("identifier = '{}'", id.replace('\'', "''"));
    endpoint
        .catalog_mgr()
        .submit_query(&Query::new(filter), QueryBound::AtMost(1))
        .await?
        .into_iter()
        .next()
        .with_context(|| format!("No record with identifier '{id}'"))
}

pub async fn related_command(endpoint: &Endpoint, id: String) -> Result<()> {
    let graph = graph_for(endpoint, &id).await?;
    let product = endpoint.product_mgr();
    let types = product.related_file_types(&graph).await?;
    let files = product.related_files(&graph).await?;

    if files.is_empty() {
        println!("{id} has no related files.");
        return Ok(());
    }
    for (file_type, filename) in types.iter().zip(&files) {
        let location = endpoint
            .receipts()
            .into_iter()
            .find(|r| &r.filename == filename)
            .map(|r| r.location)
            .unwrap_or_default();
        println!("{file_type}\t{filename}\t{location}");
    }
    Ok(())
}

pub async fn order_command(
    endpoint: &Endpoint,
    ids: Vec<String>,
    format: Option<PackageFormat>,
    no_related: bool,
    json_output: bool,
) -> Result<()> {
    let mut request = OrderRequest::new(ids);
    request.format = format;
    if no_related {
        request = request.with_related_files(false);
    }

    let orders = endpoint.order_mgr();
    let issues = orders.validate_order(&request).await?;
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("  - {issue}");
        }
        anyhow::bail!("Order refused ({} issue(s))", issues.len());
    }

    let result = orders.place(request).await?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Order {}: {}", result.order_id, result.status);
        println!("  Package:  {}", result.filename);
        println!("  Location: {}", result.location);
        println!("  Size:     {} bytes", result.size);
        println!("  Checksum: {}", result.checksum);
    }
    Ok(())
}
