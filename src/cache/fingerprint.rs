//! Deterministic cache key derivation.

use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

/// Hex SHA-256 over length-prefixed parts, so `["ab", "c"]` and `["a", "bc"]`
/// produce different keys.
pub fn fingerprint(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// Key for a source file: path, size and modification time.
pub fn file_fingerprint(path: &Path) -> std::io::Result<String> {
    let meta = std::fs::metadata(path)?;
    let mtime_ns = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Ok(fingerprint(&[
        path.to_string_lossy().as_bytes(),
        &meta.len().to_le_bytes(),
        &mtime_ns.to_le_bytes(),
    ]))
}

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_separated() {
        assert_ne!(fingerprint(&[b"ab", b"c"]), fingerprint(&[b"a", b"bc"]));
        assert_eq!(fingerprint(&[b"x"]), fingerprint(&[b"x"]));
        assert_eq!(fingerprint(&[b"x"]).len(), 64);
    }

    #[test]
    fn query_normalization() {
        assert_eq!(normalize_query("  Rust   Memory\tBudget "), "rust memory budget");
        assert_eq!(normalize_query(""), "");
    }

    #[test]
    fn file_fingerprint_tracks_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"v1").unwrap();
        let first = file_fingerprint(&path).unwrap();
        assert_eq!(first, file_fingerprint(&path).unwrap());

        std::fs::write(&path, b"version two").unwrap();
        assert_ne!(first, file_fingerprint(&path).unwrap());
        assert!(file_fingerprint(&dir.path().join("missing.pdf")).is_err());
    }
}
