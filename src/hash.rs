//! Streaming content-hash pipeline backing the ETag sidecars

use std::fmt;
use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::error::{CdnError, Result};

/// Digest algorithms accepted for sidecar hashes, strongest first
///
/// This order is also the fallback preference when an operator names an
/// algorithm that is not recognized.
pub const PREFERENCE: [HashAlgorithm; 6] = [
    HashAlgorithm::Sha512,
    HashAlgorithm::Sha384,
    HashAlgorithm::Sha256,
    HashAlgorithm::Sha224,
    HashAlgorithm::Sha1,
    HashAlgorithm::Md5,
];

/// Hash algorithm used for artifact sidecars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha512,
    Sha384,
    Sha256,
    Sha224,
    Sha1,
    Md5,
}

impl HashAlgorithm {
    /// Algorithm name as used in sidecar file suffixes
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Md5 => "md5",
        }
    }

    /// Resolve an operator-supplied algorithm name
    ///
    /// Unknown names fall back to the strongest entry of [`PREFERENCE`];
    /// an empty name is a configuration error.
    pub fn resolve(name: &str) -> Result<HashAlgorithm> {
        if name.is_empty() {
            return Err(CdnError::ConfigError(
                "etag hash algorithm name is empty".to_string(),
            ));
        }
        for algorithm in PREFERENCE {
            if algorithm.name() == name {
                return Ok(algorithm);
            }
        }
        let fallback = PREFERENCE[0];
        warn!(
            requested = name,
            using = fallback.name(),
            "unknown hash algorithm, falling back to strongest available"
        );
        Ok(fallback)
    }

    /// Stream the file at `path` through the digest
    ///
    /// Returns the lowercase hex digest string, exactly the bytes stored in
    /// a sidecar file.
    pub async fn digest_file(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path)
            .await
            .map_err(|e| CdnError::HashError(format!("open {}: {e}", path.display())))?;
        let mut hasher = Hasher::new(*self);
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| CdnError::HashError(format!("read {}: {e}", path.display())))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize_hex())
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Hasher {
    Sha512(Sha512),
    Sha384(Sha384),
    Sha256(Sha256),
    Sha224(Sha224),
    Sha1(Sha1),
    Md5(Md5),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Hasher {
        match algorithm {
            HashAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
            HashAlgorithm::Sha384 => Hasher::Sha384(Sha384::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha224 => Hasher::Sha224(Sha224::new()),
            HashAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            HashAlgorithm::Md5 => Hasher::Md5(Md5::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Hasher::Sha512(h) => h.update(chunk),
            Hasher::Sha384(h) => h.update(chunk),
            Hasher::Sha256(h) => h.update(chunk),
            Hasher::Sha224(h) => h.update(chunk),
            Hasher::Sha1(h) => h.update(chunk),
            Hasher::Md5(h) => h.update(chunk),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha512(h) => hex::encode(h.finalize()),
            Hasher::Sha384(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha224(h) => hex::encode(h.finalize()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Md5(h) => hex::encode(h.finalize()),
        }
    }
}
