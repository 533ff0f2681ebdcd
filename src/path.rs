//! Object path assembly for bus objects.
//!
//! A path is a fixed root followed by one escaped element per dynamic
//! segment. Escaping keeps only `[A-Za-z0-9]` as-is; every other byte is
//! written as `_` plus two lowercase hex digits, and an empty segment is
//! written as a lone `_`. The separator `/` never survives inside a segment,
//! so distinct segment sequences always produce distinct paths.

use thiserror::Error;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Invalid object path root: {0:?}")]
    InvalidRoot(String),

    #[error("Path segment {index} contains a NUL byte")]
    InvalidSegment { index: usize },

    #[error("Encoded path rejected: {0}")]
    Rejected(String),
}

/// Check that `root` is a usable prefix: a valid object path other than `/`.
pub fn validate_root(root: &str) -> Result<(), PathError> {
    if root == "/" || ObjectPath::try_from(root).is_err() {
        return Err(PathError::InvalidRoot(root.to_string()));
    }
    Ok(())
}

/// Escape a single segment. Returns `None` if the segment holds a NUL byte,
/// which no bus string can carry.
pub fn escape_segment(segment: &str) -> Option<String> {
    if segment.is_empty() {
        return Some("_".to_string());
    }

    let mut escaped = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            0 => return None,
            b if b.is_ascii_alphanumeric() => escaped.push(b as char),
            b => escaped.push_str(&format!("_{:02x}", b)),
        }
    }
    Some(escaped)
}

/// Join `segments` under `root`, escaping each one.
pub fn encode<S: AsRef<str>>(root: &str, segments: &[S]) -> Result<OwnedObjectPath, PathError> {
    validate_root(root)?;

    let mut path = String::from(root);
    for (index, segment) in segments.iter().enumerate() {
        let escaped = escape_segment(segment.as_ref()).ok_or(PathError::InvalidSegment { index })?;
        path.push('/');
        path.push_str(&escaped);
    }

    ObjectPath::try_from(path)
        .map(OwnedObjectPath::from)
        .map_err(|e| PathError::Rejected(e.to_string()))
}
