//! SHA-1 helpers shared by every stage and the forwarder.

use sha1::{Digest, Sha1};

/// Lowercase hex SHA-1 of `bytes`.
pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Identity of a URL row: the SHA-1 of the URL string.
pub fn url_id(url: &str) -> String {
    sha1_hex(url.as_bytes())
}

/// True when `candidate` is exactly 40 lowercase hex characters.
pub fn is_sha1_hex(candidate: &str) -> bool {
    candidate.len() == 40
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Incremental hasher computing the full digest and the prefix digest of a
/// byte stream in one pass.
pub struct PrefixHasher {
    prefix_size: u64,
    full: Sha1,
    prefix: Sha1,
    length: u64,
}

/// Digests produced by [`PrefixHasher::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDigest {
    pub sha1: String,
    pub prefix_sha1: String,
    pub length: u64,
}

impl PrefixHasher {
    pub fn new(prefix_size: u64) -> Self {
        Self {
            prefix_size,
            full: Sha1::new(),
            prefix: Sha1::new(),
            length: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        if self.length < self.prefix_size {
            let room = (self.prefix_size - self.length).min(bytes.len() as u64) as usize;
            self.prefix.update(&bytes[..room]);
        }
        self.full.update(bytes);
        self.length += bytes.len() as u64;
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn finish(self) -> StreamDigest {
        StreamDigest {
            sha1: hex::encode(self.full.finalize()),
            prefix_sha1: hex::encode(self.prefix.finalize()),
            length: self.length,
        }
    }
}
