//! SHA-256 digests of cached asset bytes.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{FetchError, Result};

/// Lowercase hex SHA-256 of an in-memory payload.
#[must_use]
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lowercase hex SHA-256 of a file on disk.
pub fn digest_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| FetchError::io("read", path, e))?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| FetchError::io("read", path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_digest_bytes() {
        assert_eq!(digest_bytes(b"hello"), HELLO_SHA256);
    }

    #[test]
    fn test_digest_file_matches_bytes() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"hello").unwrap();
        temp_file.flush().unwrap();

        assert_eq!(digest_file(temp_file.path()).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_digest_missing_file() {
        let err = digest_file(Path::new("/nonexistent/slot/asset.bin")).unwrap_err();
        assert!(matches!(err, FetchError::Io { operation: "read", .. }));
    }
}
