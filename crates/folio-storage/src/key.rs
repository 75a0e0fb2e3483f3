//! Object key validation shared by all backends.

use crate::error::{StorageError, StorageResult};

/// Validates an object key and returns it with surrounding whitespace removed.
///
/// Keys are relative, `/`-separated paths. Empty segments, `.` and `..`
/// segments, backslashes and NUL bytes are rejected so that a key can never
/// name anything outside the backend's root or bucket prefix.
pub fn validate_key(key: &str) -> StorageResult<&str> {
    let trimmed = key.trim();
    let reject = |reason: &'static str| {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if trimmed.is_empty() {
        return reject("key must not be empty");
    }
    if trimmed.starts_with('/') {
        return reject("key must be relative");
    }
    if trimmed.contains('\\') {
        return reject("backslash in key");
    }
    if trimmed.contains('\0') {
        return reject("NUL byte in key");
    }
    for segment in trimmed.split('/') {
        match segment {
            "" => return reject("empty path segment"),
            "." => return reject("current directory segment"),
            ".." => return reject("parent directory segment"),
            _ => {}
        }
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_nested_keys() {
        assert_eq!(validate_key("photo.jpg").unwrap(), "photo.jpg");
        assert_eq!(validate_key("2024/trip/photo.jpg").unwrap(), "2024/trip/photo.jpg");
        assert_eq!(validate_key("  spaced.png \n").unwrap(), "spaced.png");
    }

    #[test]
    fn test_rejects_traversal() {
        assert!(validate_key("../secret").is_err());
        assert!(validate_key("a/../../b").is_err());
        assert!(validate_key("a/./b").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(validate_key("").is_err());
        assert!(validate_key("   ").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("dir/").is_err());
        assert!(validate_key("a\\b").is_err());
        assert!(validate_key("a\0b").is_err());
    }
}
