//! Static extension tables shared by the classifier, the normalizer, the relay
//! and the `/supported-formats` route.

use std::path::Path;

use serde::Serialize;
use utoipa::ToSchema;

pub const OCTET_STREAM: &str = "application/octet-stream";

pub const DATA_FILES: &[(&str, &str)] = &[
    (".csv", "text/csv"),
    (
        ".xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (".xls", "application/vnd.ms-excel"),
    (".json", "application/json"),
    (".yaml", "application/x-yaml"),
    (".yml", "application/x-yaml"),
];

pub const DOCUMENT_FILES: &[(&str, &str)] = &[
    (".txt", "text/plain"),
    (".pdf", "application/pdf"),
    (".doc", "application/msword"),
    (
        ".docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (".html", "text/html"),
    (".md", "text/markdown"),
];

/// Types announced for generated files in `chart` frames.
const GENERATED_FILES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("svg", "image/svg+xml"),
    ("html", "text/html"),
    ("csv", "text/csv"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
];

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "svg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    File,
}

/// Lowercased extension including the leading dot, e.g. `.csv`.
pub fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
}

fn lookup(table: &'static [(&'static str, &'static str)], ext: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, mime)| *mime)
}

pub fn is_data_file(file_name: &str) -> bool {
    extension(file_name).is_some_and(|ext| lookup(DATA_FILES, &ext).is_some())
}

pub fn is_document_file(file_name: &str) -> bool {
    extension(file_name).is_some_and(|ext| lookup(DOCUMENT_FILES, &ext).is_some())
}

pub fn is_supported(file_name: &str) -> bool {
    is_data_file(file_name) || is_document_file(file_name)
}

/// MIME type from the data and document tables only.
pub fn table_mime(file_name: &str) -> Option<&'static str> {
    let ext = extension(file_name)?;
    lookup(DATA_FILES, &ext).or_else(|| lookup(DOCUMENT_FILES, &ext))
}

pub fn generated_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    lookup(GENERATED_FILES, &ext).unwrap_or(OCTET_STREAM)
}

pub fn artifact_kind(file_name: &str) -> ArtifactKind {
    let lower = file_name.to_ascii_lowercase();
    if IMAGE_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
    {
        ArtifactKind::Image
    } else {
        ArtifactKind::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_case_insensitive() {
        assert_eq!(extension("Sales.XLSX").as_deref(), Some(".xlsx"));
        assert_eq!(extension("README"), None);
        assert!(is_data_file("q3.CSV"));
        assert!(is_document_file("notes.Md"));
        assert!(!is_supported("photo.png"));
    }

    #[test]
    fn generated_types_fall_back_to_octet_stream() {
        assert_eq!(generated_mime("chart_1.PNG"), "image/png");
        assert_eq!(generated_mime("plot.svg"), "image/svg+xml");
        assert_eq!(generated_mime("archive.zip"), OCTET_STREAM);
        assert_eq!(generated_mime("noext"), OCTET_STREAM);
    }

    #[test]
    fn artifact_kinds() {
        assert_eq!(artifact_kind("a.JPEG"), ArtifactKind::Image);
        assert_eq!(artifact_kind("report.csv"), ArtifactKind::File);
    }
}
