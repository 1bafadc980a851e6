use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use vizstream_agent_client::Attachment;
use vizstream_error::VizError;

use crate::formats;

/// Largest file accepted as inline byte content.
pub const DEFAULT_MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("invalid base64 file data: {0}")]
    InvalidEncoding(String),
    #[error("file too large: {size_bytes} bytes (max {max_bytes})")]
    TooLarge { size_bytes: usize, max_bytes: usize },
}

impl From<NormalizeError> for VizError {
    fn from(value: NormalizeError) -> Self {
        match value {
            NormalizeError::InvalidEncoding(message) => VizError::InvalidEncoding { message },
            NormalizeError::TooLarge {
                size_bytes,
                max_bytes,
            } => VizError::PayloadTooLarge {
                size_bytes,
                max_bytes,
            },
        }
    }
}

/// Decodes and validates an inbound file. The returned attachment carries no
/// use cases yet.
pub fn normalize(
    payload: &str,
    declared_mime: Option<&str>,
    file_name: &str,
    max_bytes: usize,
) -> Result<Attachment, NormalizeError> {
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|err| NormalizeError::InvalidEncoding(err.to_string()))?;
    check_size(bytes.len(), max_bytes)?;
    let media_type = resolve_mime(file_name, declared_mime);
    Ok(Attachment::new(file_name, bytes, media_type))
}

pub fn check_size(size_bytes: usize, max_bytes: usize) -> Result<(), NormalizeError> {
    if size_bytes > max_bytes {
        return Err(NormalizeError::TooLarge {
            size_bytes,
            max_bytes,
        });
    }
    Ok(())
}

/// Declared type, then the extension tables, then a guess from the extension,
/// then `application/octet-stream`.
pub fn resolve_mime(file_name: &str, declared: Option<&str>) -> String {
    if let Some(declared) = declared.map(str::trim).filter(|value| !value.is_empty()) {
        return declared.to_string();
    }
    if let Some(mime) = formats::table_mime(file_name) {
        return mime.to_string();
    }
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(formats::OCTET_STREAM)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exact_bytes() {
        let original: Vec<u8> = (0..=255u8).collect();
        let encoded = STANDARD.encode(&original);
        let attachment = normalize(&encoded, Some("application/octet-stream"), "blob.bin", 1024)
            .expect("normalize");
        assert_eq!(attachment.bytes.as_ref(), original.as_slice());
        assert!(attachment.use_cases.is_empty());
    }

    #[test]
    fn rejects_invalid_base64_with_decoder_message() {
        let err = normalize("not base64!", None, "a.csv", 1024).expect_err("invalid");
        match err {
            NormalizeError::InvalidEncoding(message) => assert!(!message.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_payload_over_ceiling() {
        let encoded = STANDARD.encode(vec![0u8; 11]);
        let err = normalize(&encoded, None, "a.csv", 10).expect_err("too large");
        assert!(matches!(
            err,
            NormalizeError::TooLarge {
                size_bytes: 11,
                max_bytes: 10
            }
        ));

        let viz: VizError = err.into();
        assert_eq!(
            viz.to_string(),
            "file too large: 0.00MB (max 0.00MB)"
        );
    }

    #[test]
    fn ceiling_is_inclusive() {
        let encoded = STANDARD.encode(vec![1u8; 10]);
        assert!(normalize(&encoded, None, "a.csv", 10).is_ok());
    }

    #[test]
    fn mime_resolution_fallback_chain() {
        assert_eq!(resolve_mime("data.csv", Some("text/x-custom")), "text/x-custom");
        assert_eq!(resolve_mime("data.csv", Some("  ")), "text/csv");
        assert_eq!(resolve_mime("notes.MD", None), "text/markdown");
        assert_eq!(resolve_mime("photo.png", None), "image/png");
        assert_eq!(resolve_mime("mystery.zzzq", None), "application/octet-stream");
    }
}
