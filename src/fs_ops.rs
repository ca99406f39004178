//! Filesystem primitives behind the derivative cache
//!
//! Thin async wrappers over the filesystem, each read-side wrapper guarded
//! by a single-flight registry keyed by target path so N concurrent callers
//! for the same path cost one syscall. Writes are not registered here; the
//! request channel's single-flight already guarantees one producer per
//! artifact.

use std::path::Path;

use bytes::Bytes;
use tokio::fs;
use tokio::sync::oneshot;
use tracing::debug;

use crate::compress::{self, CompressionLevel, Encoding};
use crate::error::{CdnError, Result};
use crate::hash::HashAlgorithm;
use crate::single_flight::SingleFlight;

/// Stat result reduced to what the cache engine consumes
///
/// `last_modified` is pre-formatted as an HTTP-date because the only
/// consumers are the `Last-Modified` header and the forwarded-op reply,
/// which carries exactly this reduced shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub last_modified: String,
    pub is_file: bool,
}

/// The local filesystem primitives with their single-flight registries
///
/// Holds the immutable pieces the producing pipelines need: the resolved
/// compression level and the sidecar hash algorithm.
#[derive(Debug)]
pub struct FilePrimitives {
    level: CompressionLevel,
    algorithm: HashAlgorithm,
    stats: SingleFlight<oneshot::Sender<Result<FileInfo>>>,
    reads: SingleFlight<oneshot::Sender<Result<Bytes>>>,
    mkdirs: SingleFlight<oneshot::Sender<Result<()>>>,
}

impl FilePrimitives {
    pub fn new(level: CompressionLevel, algorithm: HashAlgorithm) -> Self {
        FilePrimitives {
            level,
            algorithm,
            stats: SingleFlight::new(),
            reads: SingleFlight::new(),
            mkdirs: SingleFlight::new(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Stat `path`, coalescing concurrent callers for the same path
    pub async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let key = path.to_string_lossy();
        self.stats
            .run(&key, || async {
                let metadata = fs::metadata(path)
                    .await
                    .map_err(|e| CdnError::IoError(format!("stat {}: {e}", path.display())))?;
                let modified = metadata
                    .modified()
                    .map_err(|e| CdnError::IoError(format!("mtime {}: {e}", path.display())))?;
                Ok(FileInfo {
                    size: metadata.len(),
                    last_modified: httpdate::fmt_http_date(modified),
                    is_file: metadata.is_file(),
                })
            })
            .await
    }

    /// Read the whole file at `path`, coalescing concurrent callers
    ///
    /// Used only for sidecar contents, which are a few dozen bytes.
    pub async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let key = path.to_string_lossy();
        self.reads
            .run(&key, || async {
                let contents = fs::read(path)
                    .await
                    .map_err(|e| CdnError::IoError(format!("read {}: {e}", path.display())))?;
                Ok(Bytes::from(contents))
            })
            .await
    }

    /// Ensure every directory between `root` and the parent of `file`
    ///
    /// # Arguments
    /// * `root` - Existing directory the tree hangs off; never created here
    /// * `file` - File whose parent chain is brought into existence
    ///
    /// Creation proceeds component by component, treating "already exists"
    /// as success; each component is single-flighted by its directory path.
    pub async fn create_dir_between(&self, root: &Path, file: &Path) -> Result<()> {
        let parent = match file.parent() {
            Some(parent) => parent,
            None => return Ok(()),
        };
        let relative = parent.strip_prefix(root).map_err(|_| {
            CdnError::IoError(format!(
                "{} is not under {}",
                file.display(),
                root.display()
            ))
        })?;

        let mut current = root.to_path_buf();
        for component in relative.components() {
            current.push(component);
            let dir = current.clone();
            let key = dir.to_string_lossy().to_string();
            self.mkdirs
                .run(&key, || async move {
                    match fs::create_dir(&dir).await {
                        Ok(()) => Ok(()),
                        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
                        Err(e) => Err(CdnError::IoError(format!(
                            "mkdir {}: {e}",
                            dir.display()
                        ))),
                    }
                })
                .await?;
        }
        Ok(())
    }

    /// Create or truncate `path` with `contents`
    pub async fn write_file(&self, path: &Path, contents: Bytes) -> Result<()> {
        fs::write(path, &contents)
            .await
            .map_err(|e| CdnError::IoError(format!("write {}: {e}", path.display())))?;
        debug!(path = %path.display(), bytes = contents.len(), "file written");
        Ok(())
    }

    /// Stream `source` through the codec for `encoding` into `target`
    pub async fn write_stream(
        &self,
        source: &Path,
        target: &Path,
        encoding: Encoding,
    ) -> Result<()> {
        compress::write_stream(source, target, encoding, self.level).await
    }

    /// Digest the file at `path` with the configured algorithm
    pub async fn hash_file(&self, path: &Path) -> Result<String> {
        self.algorithm.digest_file(path).await
    }
}
