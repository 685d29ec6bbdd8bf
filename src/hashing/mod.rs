//! Multi-algorithm file checksums for `file_status`/`ls --checksums` (spec
//! §11 supplemental feature).

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Checksums {
    /// A git blob-object hash: `sha1("blob " + len + "\0" + content)`, so it
    /// matches `git hash-object` for the same bytes.
    pub git_sha1: String,
    pub sha256: String,
    pub md5: String,
}

pub fn checksums(content: &[u8]) -> Checksums {
    Checksums {
        git_sha1: git_blob_sha1(content),
        sha256: hex::encode(Sha256::digest(content)),
        md5: hex::encode(Md5::digest(content)),
    }
}

fn git_blob_sha1(content: &[u8]) -> String {
    let header = format!("blob {}\0", content.len());
    let mut hasher = Sha1::new();
    hasher.update(header.as_bytes());
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_sha1_matches_known_git_hash_object_value() {
        // `printf '' | git hash-object --stdin` => e69de29bb2d1d6434b8b29ae775ad8c2e48c5391
        assert_eq!(
            git_blob_sha1(b""),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }

    #[test]
    fn checksums_are_deterministic() {
        let a = checksums(b"hello");
        let b = checksums(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_yields_different_hashes() {
        let a = checksums(b"hello");
        let b = checksums(b"world");
        assert_ne!(a.sha256, b.sha256);
    }
}
