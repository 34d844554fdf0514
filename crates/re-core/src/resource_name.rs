//! Parsing and formatting of `ByteStream` wire resource names.
//!
//! Read form:  `[<instance>/]blobs/<hash>/<size>[/<filename>]`
//! Write form: `[<instance>/]uploads/<uuid>/blobs/<hash>/<size>[/<filename>]`
//!
//! Either `blobs` segment may instead be `compressed-blobs/zstd`, signalling
//! that the referenced content is zstd-compressed on the wire.

use crate::digest::Digest;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    Identity,
    Zstd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceName {
    pub instance: String,
    pub digest: Digest,
    pub compressor: Compressor,
    pub upload_uuid: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResourceNameError {
    #[error("resource name is empty")]
    Empty,
    #[error("resource name `{0}` has neither a blobs nor an uploads segment")]
    NoAnchor(String),
    #[error("resource name `{0}` is missing its size segment")]
    MissingSize(String),
    #[error("resource name `{0}` has a non-numeric size segment")]
    InvalidSize(String),
    #[error("resource name `{0}` is missing its upload uuid")]
    MissingUploadUuid(String),
    #[error("resource name `{0}` has an unrecognized blob-kind segment")]
    UnrecognizedBlobKind(String),
}

impl ResourceName {
    /// Parse either the read form or the write form of a resource name.
    pub fn parse(path: &str) -> Result<Self, ResourceNameError> {
        if path.is_empty() {
            return Err(ResourceNameError::Empty);
        }
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if let Some(idx) = segments.iter().position(|s| *s == "uploads") {
            let instance = segments[..idx].join("/");
            let uuid = segments
                .get(idx + 1)
                .ok_or_else(|| ResourceNameError::MissingUploadUuid(path.to_string()))?;
            let (compressor, rest_start) = parse_blob_kind(&segments, idx + 2, path)?;
            let (digest, filename_consumed) = parse_hash_size(&segments, rest_start, path)?;
            let _ = filename_consumed;
            Ok(ResourceName {
                instance,
                digest,
                compressor,
                upload_uuid: Some((*uuid).to_string()),
            })
        } else if let Some(idx) = segments
            .iter()
            .position(|s| *s == "blobs" || *s == "compressed-blobs")
        {
            let instance = segments[..idx].join("/");
            let (compressor, rest_start) = parse_blob_kind(&segments, idx, path)?;
            let (digest, _) = parse_hash_size(&segments, rest_start, path)?;
            Ok(ResourceName {
                instance,
                digest,
                compressor,
                upload_uuid: None,
            })
        } else {
            Err(ResourceNameError::NoAnchor(path.to_string()))
        }
    }

    /// Render the read-form wire path for this resource.
    pub fn to_read_path(&self) -> String {
        let blob_kind = match self.compressor {
            Compressor::Identity => "blobs".to_string(),
            Compressor::Zstd => "compressed-blobs/zstd".to_string(),
        };
        if self.instance.is_empty() {
            format!("{blob_kind}/{}/{}", self.digest.hash, self.digest.size_bytes)
        } else {
            format!(
                "{}/{blob_kind}/{}/{}",
                self.instance, self.digest.hash, self.digest.size_bytes
            )
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_read_path())
    }
}

/// Consumes the `blobs` or `compressed-blobs/zstd` anchor starting at
/// `start`, returning the resolved compressor and the index of the next
/// unconsumed segment (the hash).
fn parse_blob_kind(
    segments: &[&str],
    start: usize,
    whole: &str,
) -> Result<(Compressor, usize), ResourceNameError> {
    match segments.get(start) {
        Some(&"blobs") => Ok((Compressor::Identity, start + 1)),
        Some(&"compressed-blobs") => match segments.get(start + 1) {
            Some(&"zstd") => Ok((Compressor::Zstd, start + 2)),
            _ => Err(ResourceNameError::UnrecognizedBlobKind(whole.to_string())),
        },
        _ => Err(ResourceNameError::UnrecognizedBlobKind(whole.to_string())),
    }
}

fn parse_hash_size(
    segments: &[&str],
    start: usize,
    whole: &str,
) -> Result<(Digest, usize), ResourceNameError> {
    let hash = segments
        .get(start)
        .ok_or_else(|| ResourceNameError::MissingSize(whole.to_string()))?;
    let size_str = segments
        .get(start + 1)
        .ok_or_else(|| ResourceNameError::MissingSize(whole.to_string()))?;
    let size_bytes: i64 = size_str
        .parse()
        .map_err(|_| ResourceNameError::InvalidSize(whole.to_string()))?;
    Ok((Digest::new((*hash).to_string(), size_bytes), start + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_read_form() {
        let r = ResourceName::parse("blobs/abc123/42").unwrap();
        assert_eq!(r.instance, "");
        assert_eq!(r.digest, Digest::new("abc123", 42));
        assert_eq!(r.compressor, Compressor::Identity);
        assert!(r.upload_uuid.is_none());
    }

    #[test]
    fn parses_instance_scoped_read_form_with_filename() {
        let r = ResourceName::parse("my/instance/blobs/abc123/42/foo.txt").unwrap();
        assert_eq!(r.instance, "my/instance");
        assert_eq!(r.digest, Digest::new("abc123", 42));
    }

    #[test]
    fn parses_write_form() {
        let r = ResourceName::parse("uploads/u-1/blobs/abc123/42").unwrap();
        assert_eq!(r.instance, "");
        assert_eq!(r.upload_uuid.as_deref(), Some("u-1"));
        assert_eq!(r.digest, Digest::new("abc123", 42));
    }

    #[test]
    fn parses_instance_scoped_write_form() {
        let r = ResourceName::parse("my-instance/uploads/u-1/blobs/abc123/42/f").unwrap();
        assert_eq!(r.instance, "my-instance");
        assert_eq!(r.upload_uuid.as_deref(), Some("u-1"));
    }

    #[test]
    fn parses_compressed_variant() {
        let r = ResourceName::parse("compressed-blobs/zstd/abc123/42").unwrap();
        assert_eq!(r.compressor, Compressor::Zstd);
    }

    #[test]
    fn rejects_missing_anchor() {
        assert_eq!(
            ResourceName::parse("nothing/here/42"),
            Err(ResourceNameError::NoAnchor("nothing/here/42".to_string()))
        );
    }

    #[test]
    fn rejects_non_numeric_size() {
        assert!(matches!(
            ResourceName::parse("blobs/abc123/notanumber"),
            Err(ResourceNameError::InvalidSize(_))
        ));
    }

    #[test]
    fn round_trips_read_path() {
        let r = ResourceName::parse("blobs/abc123/42").unwrap();
        assert_eq!(r.to_read_path(), "blobs/abc123/42");
    }
}
