//! Encoding groups and the streaming compression pipeline
//!
//! An asset is served through one of three encoding groups. The compressed
//! groups stream the source file through flate2 into a persistent artifact
//! under the destination tree; the raw group serves the source directly.

use std::io::Write;
use std::path::Path;

use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{CdnError, Result};

/// Encoding group an asset is served through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Source bytes, no transform
    Raw,
    /// RFC 1952 gzip
    Gzip,
    /// RFC 1950 zlib stream (HTTP "deflate")
    Deflate,
}

impl Encoding {
    /// Group name used in channel keys and artifact/sidecar suffixes
    pub fn token(&self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }

    /// `Content-Encoding` header value, if the group carries one
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Encoding::Raw => None,
            Encoding::Gzip => Some("gzip"),
            Encoding::Deflate => Some("deflate"),
        }
    }

    /// Select the group for a request
    ///
    /// Matching is by substring presence, not q-values; gzip wins over
    /// deflate when both are advertised. Non-compressible assets are always
    /// raw regardless of `Accept-Encoding`.
    pub fn select(accept_encoding: Option<&str>, compressible: bool) -> Encoding {
        if !compressible {
            return Encoding::Raw;
        }
        match accept_encoding {
            Some(value) if value.contains("gzip") => Encoding::Gzip,
            Some(value) if value.contains("deflate") => Encoding::Deflate,
            _ => Encoding::Raw,
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Resolved compression level
///
/// `"best" | "speed" | "no" | "default"` map to the corresponding flate2
/// constants; integers 0-9 are taken literally; anything else resolves to
/// the default level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    Best,
    Speed,
    None,
    Default,
    Precise(u32),
}

impl CompressionLevel {
    pub fn resolve_name(name: &str) -> CompressionLevel {
        match name {
            "best" => CompressionLevel::Best,
            "speed" => CompressionLevel::Speed,
            "no" => CompressionLevel::None,
            _ => CompressionLevel::Default,
        }
    }

    pub fn resolve_int(level: i64) -> CompressionLevel {
        if (0..=9).contains(&level) {
            CompressionLevel::Precise(level as u32)
        } else {
            CompressionLevel::Default
        }
    }

    pub fn to_flate2(self) -> Compression {
        match self {
            CompressionLevel::Best => Compression::best(),
            CompressionLevel::Speed => Compression::fast(),
            CompressionLevel::None => Compression::none(),
            CompressionLevel::Default => Compression::default(),
            CompressionLevel::Precise(level) => Compression::new(level),
        }
    }
}

enum Codec {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(ZlibEncoder<Vec<u8>>),
}

impl Codec {
    fn new(encoding: Encoding, level: Compression) -> Result<Codec> {
        match encoding {
            Encoding::Gzip => Ok(Codec::Gzip(GzEncoder::new(Vec::new(), level))),
            Encoding::Deflate => Ok(Codec::Deflate(ZlibEncoder::new(Vec::new(), level))),
            Encoding::Raw => Err(CdnError::CompressionError(
                "raw group has no compression pipeline".to_string(),
            )),
        }
    }

    fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        match self {
            Codec::Gzip(enc) => enc.write_all(chunk),
            Codec::Deflate(enc) => enc.write_all(chunk),
        }
    }

    /// Drain whatever the encoder has produced so far
    fn take_output(&mut self) -> Vec<u8> {
        match self {
            Codec::Gzip(enc) => std::mem::take(enc.get_mut()),
            Codec::Deflate(enc) => std::mem::take(enc.get_mut()),
        }
    }

    fn finish(self) -> std::io::Result<Vec<u8>> {
        match self {
            Codec::Gzip(enc) => enc.finish(),
            Codec::Deflate(enc) => enc.finish(),
        }
    }
}

const CHUNK_SIZE: usize = 64 * 1024;

/// Stream `source` through the codec for `encoding` into `target`
///
/// Reads the source in chunks and drains encoder output to the target file
/// as it is produced, so memory stays bounded regardless of asset size.
/// Any stage error fails the whole operation; the partially written target
/// is left for the operator (artifacts are never overwritten, so a failed
/// producer fails its channel rather than retrying).
pub async fn write_stream(
    source: &Path,
    target: &Path,
    encoding: Encoding,
    level: CompressionLevel,
) -> Result<()> {
    let mut codec = Codec::new(encoding, level.to_flate2())?;
    let mut src = File::open(source)
        .await
        .map_err(|e| CdnError::CompressionError(format!("open {}: {e}", source.display())))?;
    let mut dst = File::create(target)
        .await
        .map_err(|e| CdnError::CompressionError(format!("create {}: {e}", target.display())))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total_in: u64 = 0;
    let mut total_out: u64 = 0;
    loop {
        let n = src
            .read(&mut buf)
            .await
            .map_err(|e| CdnError::CompressionError(format!("read {}: {e}", source.display())))?;
        if n == 0 {
            break;
        }
        total_in += n as u64;
        codec
            .write(&buf[..n])
            .map_err(|e| CdnError::CompressionError(e.to_string()))?;
        let produced = codec.take_output();
        if !produced.is_empty() {
            total_out += produced.len() as u64;
            dst.write_all(&produced)
                .await
                .map_err(|e| CdnError::CompressionError(format!("write {}: {e}", target.display())))?;
        }
    }

    let tail = codec
        .finish()
        .map_err(|e| CdnError::CompressionError(e.to_string()))?;
    total_out += tail.len() as u64;
    dst.write_all(&tail)
        .await
        .map_err(|e| CdnError::CompressionError(format!("write {}: {e}", target.display())))?;
    dst.flush()
        .await
        .map_err(|e| CdnError::CompressionError(e.to_string()))?;

    debug!(
        source = %source.display(),
        target = %target.display(),
        %encoding,
        total_in,
        total_out,
        "compressed artifact written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_select_prefers_gzip() {
        assert_eq!(Encoding::select(Some("gzip, deflate"), true), Encoding::Gzip);
        assert_eq!(Encoding::select(Some("deflate, gzip"), true), Encoding::Gzip);
        assert_eq!(Encoding::select(Some("deflate"), true), Encoding::Deflate);
        assert_eq!(Encoding::select(Some("br"), true), Encoding::Raw);
        assert_eq!(Encoding::select(None, true), Encoding::Raw);
        assert_eq!(Encoding::select(Some(""), true), Encoding::Raw);
    }

    #[test]
    fn test_select_ignores_encoding_when_not_compressible() {
        assert_eq!(Encoding::select(Some("gzip, deflate"), false), Encoding::Raw);
    }

    #[test]
    fn test_level_resolution() {
        assert_eq!(CompressionLevel::resolve_name("best"), CompressionLevel::Best);
        assert_eq!(CompressionLevel::resolve_name("speed"), CompressionLevel::Speed);
        assert_eq!(CompressionLevel::resolve_name("no"), CompressionLevel::None);
        assert_eq!(
            CompressionLevel::resolve_name("default"),
            CompressionLevel::Default
        );
        assert_eq!(
            CompressionLevel::resolve_name("turbo"),
            CompressionLevel::Default
        );
        assert_eq!(CompressionLevel::resolve_int(6), CompressionLevel::Precise(6));
        assert_eq!(CompressionLevel::resolve_int(42), CompressionLevel::Default);
        assert_eq!(CompressionLevel::resolve_int(-1), CompressionLevel::Default);
    }

    #[tokio::test]
    async fn test_gzip_stream_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("data.txt");
        let target = dir.path().join("data.txt.gzip");
        let payload = "the quick brown fox jumps over the lazy dog\n".repeat(4096);
        tokio::fs::write(&source, &payload).await.unwrap();

        write_stream(&source, &target, Encoding::Gzip, CompressionLevel::Default)
            .await
            .unwrap();

        let compressed = std::fs::read(&target).unwrap();
        assert!(compressed.len() < payload.len());
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut restored = String::new();
        decoder.read_to_string(&mut restored).unwrap();
        assert_eq!(restored, payload);
    }

    #[tokio::test]
    async fn test_deflate_stream_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("data.txt");
        let target = dir.path().join("data.txt.deflate");
        let payload = "aaaabbbbcccc".repeat(10_000);
        tokio::fs::write(&source, &payload).await.unwrap();

        write_stream(&source, &target, Encoding::Deflate, CompressionLevel::Best)
            .await
            .unwrap();

        let compressed = std::fs::read(&target).unwrap();
        let mut decoder = flate2::read::ZlibDecoder::new(&compressed[..]);
        let mut restored = String::new();
        decoder.read_to_string(&mut restored).unwrap();
        assert_eq!(restored, payload);
    }

    #[tokio::test]
    async fn test_stream_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = write_stream(
            &dir.path().join("absent.txt"),
            &dir.path().join("absent.txt.gzip"),
            Encoding::Gzip,
            CompressionLevel::Default,
        )
        .await;
        assert!(matches!(result, Err(CdnError::CompressionError(_))));
    }
}
