//! AS-014: BLAKE3 hashing for templates and rendered resources.

use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String, String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash ordered components, NUL-separated so boundaries are unambiguous.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as014_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.json");
        std::fs::write(&path, "{\"Resources\":{}}").unwrap();
        let h = hash_file(&path).unwrap();
        assert!(h.starts_with("blake3:"));
        assert_eq!(h.len(), 7 + 64);
    }

    #[test]
    fn test_as014_hash_file_matches_hash_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.yaml");
        std::fs::write(&path, "Resources: {}\n").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_string("Resources: {}\n"));
    }

    #[test]
    fn test_as014_hash_string() {
        assert_eq!(hash_string("VPC"), hash_string("VPC"));
        assert_ne!(hash_string("VPC"), hash_string("VPC "));
    }

    #[test]
    fn test_as014_composite_hash_order_and_boundaries() {
        let h = composite_hash(&["AWS::S3::Bucket", "{}"]);
        assert!(h.starts_with("blake3:"));
        assert_ne!(h, composite_hash(&["{}", "AWS::S3::Bucket"]));
        assert_ne!(composite_hash(&["ab", "c"]), composite_hash(&["a", "bc"]));
    }

    #[test]
    fn test_as014_hash_file_not_found() {
        assert!(hash_file(Path::new("/nonexistent/template.json")).is_err());
    }
}
