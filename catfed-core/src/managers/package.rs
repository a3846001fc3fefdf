//! Order package synthesis (tar, optionally gzip-compressed)

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use tar::{Builder, Header};

use super::PackageFormat;
use crate::catalog::CatalogRecord;
use crate::dag::Attributes;
use crate::delivery::naming;
use crate::error::{FederationError, Result};

/// A finished package ready for upload
#[derive(Debug, Clone)]
pub struct Package {
    pub filename: String,
    pub format: PackageFormat,
    pub bytes: Vec<u8>,
    /// `sha256:<hex>` of `bytes`
    pub checksum: String,
    /// Archive paths in the order they were written
    pub entries: Vec<String>,
}

#[derive(Serialize)]
struct Metadata<'a> {
    identifier: &'a str,
    status: &'a str,
    attributes: Attributes,
}

/// Build a package holding each record's product, its `metadata.json` and,
/// when `include_related` is set, its related files.
///
/// Entry timestamps come from the records, so the same records always
/// produce the same bytes.
pub fn build_package(
    filename: &str,
    records: &[&CatalogRecord],
    format: PackageFormat,
    include_related: bool,
) -> Result<Package> {
    let packaging = |source: io::Error| FederationError::Packaging {
        filename: filename.to_string(),
        source,
    };

    let mut entries = Vec::new();
    let mut builder = Builder::new(Vec::new());
    for record in records {
        write_record(&mut builder, record, include_related, &mut entries).map_err(packaging)?;
    }
    let tar_bytes = builder.into_inner().map_err(packaging)?;

    let bytes = match format {
        PackageFormat::Tar => tar_bytes,
        PackageFormat::TarGz => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&tar_bytes).map_err(packaging)?;
            encoder.finish().map_err(packaging)?
        }
    };

    let checksum = format!("sha256:{:x}", Sha256::digest(&bytes));
    tracing::debug!(
        "Built package {} ({} entries, {} bytes, {})",
        filename,
        entries.len(),
        bytes.len(),
        checksum
    );

    Ok(Package {
        filename: filename.to_string(),
        format,
        bytes,
        checksum,
        entries,
    })
}

fn write_record(
    builder: &mut Builder<Vec<u8>>,
    record: &CatalogRecord,
    include_related: bool,
    entries: &mut Vec<String>,
) -> io::Result<()> {
    let dir = naming::sanitize(&record.id);
    let mtime = record.modified.timestamp().max(0) as u64;

    let product = format!(
        "{}/{}",
        dir,
        naming::product_filename(&record.id, &record.title, &record.content_type)
    );
    append(builder, &product, &record.product, mtime)?;
    entries.push(product);

    let metadata = Metadata {
        identifier: &record.id,
        status: record.status.as_str(),
        attributes: record.attributes(),
    };
    let metadata_json = serde_json::to_vec_pretty(&metadata)?;
    let metadata_path = format!("{dir}/metadata.json");
    append(builder, &metadata_path, &metadata_json, mtime)?;
    entries.push(metadata_path);

    if include_related {
        for related in record.related_files() {
            if let Some(content) = record.related_content(related.file_type) {
                let path = format!("{}/{}", dir, related.filename);
                append(builder, &path, content, mtime)?;
                entries.push(path);
            }
        }
    }
    Ok(())
}

fn append(builder: &mut Builder<Vec<u8>>, path: &str, data: &[u8], mtime: u64) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    builder.append_data(&mut header, path, data)
}
