//! Content hashing for deduplication fingerprints.
//!
//! [`ContentHasher`] is a streaming digest: begin, feed any number of
//! chunks, finish. [`fingerprint`] builds the DUPHASH of a problem from its
//! text fields.

use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Name of the item that stores the deduplication fingerprint.
pub const DUPHASH: &str = "duphash";

/// Digest algorithm used for fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// 20-byte digest, 40 hex characters.
    #[default]
    Sha1,
    /// 32-byte digest, 64 hex characters.
    Sha256,
}

impl HashAlgorithm {
    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
        }
    }
}

/// Streaming digest state.
///
/// # Example
///
/// ```
/// use dumpster::{ContentHasher, HashAlgorithm};
///
/// let mut hasher = ContentHasher::begin(HashAlgorithm::Sha1);
/// hasher.update("hello ");
/// hasher.update("world");
/// assert_eq!(hasher.finish_hex(), "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
/// ```
#[derive(Debug, Clone)]
pub enum ContentHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl ContentHasher {
    pub fn begin(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha1 => ContentHasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            ContentHasher::Sha1(_) => HashAlgorithm::Sha1,
            ContentHasher::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    /// Feeds another chunk. Chunk boundaries do not affect the result.
    pub fn update(&mut self, bytes: impl AsRef<[u8]>) {
        match self {
            ContentHasher::Sha1(h) => h.update(bytes.as_ref()),
            ContentHasher::Sha256(h) => h.update(bytes.as_ref()),
        }
    }

    /// Consumes the state and returns the raw digest.
    pub fn finish(self) -> Vec<u8> {
        match self {
            ContentHasher::Sha1(h) => h.finalize().to_vec(),
            ContentHasher::Sha256(h) => h.finalize().to_vec(),
        }
    }

    /// Consumes the state and returns the digest as lowercase hex.
    pub fn finish_hex(self) -> String {
        hex::encode(self.finish())
    }
}

/// One-shot digest of `data` as lowercase hex.
pub fn hash_hex(algorithm: HashAlgorithm, data: impl AsRef<[u8]>) -> String {
    let mut hasher = ContentHasher::begin(algorithm);
    hasher.update(data);
    hasher.finish_hex()
}

/// Computes the deduplication fingerprint of a set of `(name, content)` fields.
///
/// Fields are sorted by name first, so the result does not depend on the
/// order the caller produces them in. Each content is digested on its own and
/// that digest is fed to the outer hasher, which keeps `("ab", "c")` and
/// `("a", "bc")` apart.
pub fn fingerprint<'a, I>(algorithm: HashAlgorithm, fields: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut fields: Vec<(&str, &str)> = fields.into_iter().collect();
    fields.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let mut outer = ContentHasher::begin(algorithm);
    for (_, content) in fields {
        let mut inner = ContentHasher::begin(algorithm);
        inner.update(content);
        outer.update(inner.finish());
    }
    outer.finish_hex()
}
