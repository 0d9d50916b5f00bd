//! Checksum calculation for migration scripts

use crate::migration::MigrationError;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// SHA-256 of `content` as lowercase hex, the format the migration ledger stores.
#[must_use]
pub fn checksum_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Calculate the SHA-256 checksum of a migration script.
///
/// # Errors
///
/// Returns `MigrationError::Io` if the file cannot be read.
pub fn calculate_checksum(path: &Path) -> Result<String, MigrationError> {
    let content = fs::read(path).map_err(|source| MigrationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(checksum_bytes(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            checksum_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(checksum_bytes(b"abc").len(), 64);
    }

    #[test]
    fn test_file_checksum_matches_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration.sql");
        fs::write(&path, "CREATE TABLE users (id int);").unwrap();
        assert_eq!(
            calculate_checksum(&path).unwrap(),
            checksum_bytes(b"CREATE TABLE users (id int);")
        );
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = calculate_checksum(&dir.path().join("nope.sql")).unwrap_err();
        assert!(matches!(err, MigrationError::Io { .. }));
    }
}
