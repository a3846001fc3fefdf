//! Deterministic filenames for delivered artifacts
//!
//! Callers predict these names to verify delivery without a round trip, so
//! the derivations here are part of the endpoint contract.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::dag::RelatedFileType;
use crate::managers::PackageFormat;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("static regex is valid"));

/// Replace characters that are unsafe in a URL path segment
pub fn sanitize(segment: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(segment, "_");
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<identifier>-<ROLE>.<ext>`, e.g. `abc123-THUMBNAIL.jpg`
pub fn related_filename(identifier: &str, file_type: RelatedFileType) -> String {
    format!(
        "{}-{}.{}",
        sanitize(identifier),
        file_type.as_str(),
        file_type.extension()
    )
}

/// Package name for an order over `identifiers`.
///
/// One item gives `<id>-ORDER.<ext>`; several give
/// `ORDER-<16 hex of sha256(sorted ids)>.<ext>` so the name does not depend
/// on item order.
pub fn order_package_filename(identifiers: &[String], format: PackageFormat) -> String {
    match identifiers {
        [single] => format!("{}-ORDER.{}", sanitize(single), format.extension()),
        many => {
            let mut sorted: Vec<&str> = many.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            let digest = Sha256::digest(sorted.join("\n").as_bytes());
            let short = &hex::encode(digest)[..16];
            format!("ORDER-{}.{}", short, format.extension())
        }
    }
}

/// File extension for a product's MIME type
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/tiff" => "tif",
        "image/gif" => "gif",
        "application/pdf" => "pdf",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "text/plain" => "txt",
        _ => "bin",
    }
}

/// Name of the product file inside an order package
pub fn product_filename(identifier: &str, title: &str, content_type: &str) -> String {
    let title = sanitize(title);
    if title.contains('.') {
        title
    } else {
        format!("{}.{}", sanitize(identifier), extension_for(content_type))
    }
}
