//! Hashing for the ingestion pipeline
//!
//! - MD5 per chunk, checked the moment a chunk arrives. Catches transmission
//!   corruption only; it is not a defence against tampering.
//! - SHA-256 over the fully assembled file. The content identity used for
//!   deduplication and storage keys.

use md5::Md5;
use sha2::{Digest, Sha256};

/// MD5 of a chunk as lowercase hex
pub fn chunk_checksum(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Compare a computed chunk checksum with the one the client sent
///
/// Hex case and surrounding whitespace are ignored.
pub fn checksums_match(computed: &str, provided: &str) -> bool {
    computed.eq_ignore_ascii_case(provided.trim())
}

/// SHA-256 of complete file contents as lowercase hex
pub fn content_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Incremental SHA-256 for content that is assembled piece by piece
#[derive(Default, Clone)]
pub struct ContentHasher {
    hasher: Sha256,
    bytes: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Bytes hashed so far
    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_checksum_known_value() {
        assert_eq!(chunk_checksum(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(chunk_checksum(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_checksums_match_ignores_case() {
        assert!(checksums_match(&chunk_checksum(b"abc"), " 900150983CD24FB0D6963F7D28E17F72\n"));
        assert!(!checksums_match(&chunk_checksum(b"abd"), "900150983cd24fb0d6963f7d28e17f72"));
    }

    #[test]
    fn test_content_digest_known_value() {
        assert_eq!(
            content_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = b"Hello, lights and music!";
        let mut hasher = ContentHasher::new();
        for piece in data.chunks(5) {
            hasher.update(piece);
        }
        assert_eq!(hasher.len(), data.len() as u64);
        assert_eq!(hasher.finalize(), content_digest(data));
    }

    #[test]
    fn test_algorithms_differ() {
        assert_ne!(chunk_checksum(b"abc").len(), content_digest(b"abc").len());
    }
}
