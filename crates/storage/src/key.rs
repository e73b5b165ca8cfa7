//! Object key validation.
//!
//! Keys are written to the store byte-for-byte as derived, so validation
//! never rewrites a key: it either accepts it unchanged or rejects it.

use crate::error::{ErrorKind, Result};

/// Longest key S3 (and most compatible services) will accept, in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Validates an object key before it is sent to a backend.
///
/// Rejects keys that are empty, longer than [`MAX_KEY_LENGTH`] bytes, start
/// with a `/`, or contain a null byte.
///
/// # Returns
/// Returns the key unchanged if valid, or [`InvalidKey`](crate::error::ErrorKind::InvalidKey)
/// if invalid.
///
/// # Examples
///
/// ```
/// use ferry_storage::validate_key;
/// // Valid keys
/// assert!(validate_key("new-bucket/unzipped/2024-01-01/archive/a.txt").is_ok());
/// assert!(validate_key("dir/").is_ok());
/// // Invalid keys
/// assert!(validate_key("").is_err());
/// assert!(validate_key("/leading/slash").is_err());
/// assert!(validate_key("a\0b").is_err());
/// ```
pub fn validate(key: &str) -> Result<&str> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH || key.starts_with('/') || key.contains('\0') {
        exn::bail!(ErrorKind::InvalidKey(key.to_string()));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert_eq!(validate("archive/a.txt").unwrap(), "archive/a.txt");
        assert_eq!(validate("new-bucket/2024-01-01/path/file.csv").unwrap(), "new-bucket/2024-01-01/path/file.csv");
        assert_eq!(validate("single").unwrap(), "single");
    }

    #[test]
    fn test_keys_are_not_normalized() {
        // Unlike filesystem paths, these are distinct objects
        assert_eq!(validate("a//b").unwrap(), "a//b");
        assert_eq!(validate("a/./b").unwrap(), "a/./b");
        assert_eq!(validate("dir/").unwrap(), "dir/");
    }

    #[test]
    fn test_invalid_keys() {
        assert!(validate("").is_err());
        assert!(validate("/absolute").is_err());
        assert!(validate("a\0b").is_err());
        assert!(validate("\0").is_err());
    }

    #[test]
    fn test_length_limit() {
        let longest = "k".repeat(MAX_KEY_LENGTH);
        assert!(validate(&longest).is_ok());
        let too_long = "k".repeat(MAX_KEY_LENGTH + 1);
        let err = validate(&too_long).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(_)));
    }
}
